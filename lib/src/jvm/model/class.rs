use crate::jvm::model::{Attribute, Field, Method};
use crate::jvm::{BinaryName, ClassAccessFlags, MethodDescriptor, UnqualifiedName};

/// Semantic representation of a class
#[derive(Clone, Debug, PartialEq)]
pub struct Class {
    pub name: BinaryName,

    /// Super class (`None` only for `java/lang/Object`)
    pub superclass: Option<BinaryName>,

    pub interfaces: Vec<BinaryName>,
    pub access_flags: ClassAccessFlags,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl Class {
    /// Create a new empty class extending `java/lang/Object`
    pub fn new(name: BinaryName, access_flags: ClassAccessFlags) -> Class {
        Class {
            name,
            superclass: Some(BinaryName::OBJECT),
            interfaces: vec![],
            access_flags,
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn add_method(&mut self, method: Method) {
        self.methods.push(method);
    }

    /// Find a method declared on this class
    pub fn find_method(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.matches(name, descriptor))
    }
}
