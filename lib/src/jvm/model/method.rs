use crate::jvm::code::Code;
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, RenderDescriptor, UnqualifiedName};

/// Semantic representation of a method
#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,

    /// Types of the (runtime visible or invisible) annotations on the method
    pub annotations: Vec<BinaryName>,

    /// Method code implementation (`None` for abstract and native methods)
    pub code: Option<Code>,
}

impl Method {
    /// Create a new method
    pub fn new(
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
        code: Option<Code>,
    ) -> Method {
        Method {
            name,
            descriptor,
            access_flags,
            annotations: vec![],
            code,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }

    pub fn has_annotation(&self, annotation: &BinaryName) -> bool {
        self.annotations.contains(annotation)
    }

    /// Does this method match the given name and descriptor?
    pub fn matches(&self, name: &UnqualifiedName, descriptor: &MethodDescriptor) -> bool {
        &self.name == name && &self.descriptor == descriptor
    }

    /// `name` followed by the rendered descriptor
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor.render())
    }
}
