//! Marking classes that already went through instrumentation
//!
//! The marker is an [`Attribute::Instrumented`] on the class. Nothing executes it: it keeps a
//! class from being instrumented twice and tells snapshot readers which frames the code can load
//! (see [`crate::snapshot::MarkerResolver`]).

use crate::jvm::code::Code;
use crate::jvm::model::{Attribute, Class, InstrumentedMethod, Method};
use crate::jvm::RenderDescriptor;
use sha1::{Digest, Sha1};

/// Has the class already been instrumented?
pub fn is_marked(class: &Class) -> bool {
    class
        .attributes
        .iter()
        .any(|attribute| matches!(attribute, Attribute::Instrumented(_)))
}

/// Was this method of the class instrumented?
pub fn is_method_marked(class: &Class, method: &Method) -> bool {
    class.attributes.iter().any(|attribute| match attribute {
        Attribute::Instrumented(methods) => methods
            .iter()
            .any(|marked| method.matches(&marked.name, &marked.descriptor)),
        _ => false,
    })
}

/// Record instrumented methods on the class
///
/// The class is marked even if the list is empty.
pub fn mark(class: &mut Class, methods: Vec<InstrumentedMethod>) {
    for attribute in &mut class.attributes {
        if let Attribute::Instrumented(existing) = attribute {
            existing.extend(methods);
            return;
        }
    }
    class.attributes.push(Attribute::Instrumented(methods));
}

fn hash_prefix(bytes: &[u8]) -> i32 {
    let digest = Sha1::digest(bytes);
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Identifier of a method which does not change when its code changes
pub fn method_id(method: &Method) -> i32 {
    let mut identity = method.name.to_string();
    method.descriptor.render_to(&mut identity);
    hash_prefix(identity.as_bytes())
}

/// Identifier of the code of a method, which changes whenever its code changes
pub fn method_version(code: &Code) -> i32 {
    let rendered = format!("{:?}{:?}", code.instructions, code.exception_handlers);
    hash_prefix(rendered.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::{
        BinaryName, ClassAccessFlags, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
        UnqualifiedName,
    };

    fn method(code: Code) -> Method {
        Method::new(
            UnqualifiedName::RUN,
            MethodDescriptor::parse("(Lcoroutines/user/Continuation;)V").unwrap(),
            MethodAccessFlags::PUBLIC,
            Some(code),
        )
    }

    #[test]
    fn identity() {
        let first = method(Code::new(vec![Return], vec![]));
        let second = method(Code::new(vec![Nop, Return], vec![]));

        assert_eq!(method_id(&first), method_id(&second));
        let first_code = first.code.as_ref().unwrap();
        let second_code = second.code.as_ref().unwrap();
        assert_ne!(method_version(first_code), method_version(second_code));
        assert_eq!(
            method_version(first_code),
            method_version(&Code::new(vec![Return], vec![])),
            "version is deterministic"
        );
    }

    #[test]
    fn marking() {
        let run = method(Code::new(vec![Return], vec![]));
        let mut class = Class::new(
            BinaryName::from_str("me/Echo").unwrap(),
            ClassAccessFlags::PUBLIC,
        );
        assert!(!is_marked(&class));

        mark(&mut class, vec![]);
        assert!(is_marked(&class));
        assert!(!is_method_marked(&class, &run));

        mark(
            &mut class,
            vec![InstrumentedMethod {
                name: run.name.clone(),
                descriptor: run.descriptor.clone(),
                method_id: method_id(&run),
                method_version: 0,
                continuation_points: 1,
            }],
        );
        assert!(is_method_marked(&class, &run));
        assert_eq!(class.attributes.len(), 1, "markers are merged");
    }
}
