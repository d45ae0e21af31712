use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::{BaseType, BinaryName, Error, FieldType, RefType};
use crate::util::Width;

/// These types are from [this hierarchy][0], plus `Top`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType {
    /// Unusable slot: never written, the second half of a `long`/`double`, or the result of
    /// merging incompatible types
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(RefType),

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized(UninitializedRefType),
}

/// Result of a `new` instruction, before the constructor runs
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct UninitializedRefType {
    /// Once the type is initialized, what will it be?
    pub class: BinaryName,

    /// Index of the `new` instruction in the instruction list
    pub new_index: usize,
}

impl VerificationType {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Is this a reference to an object whose constructor has not yet run?
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
        )
    }

    /// Check that a value of this type can be used where the expected type is required
    ///
    /// Only categories are compared: any initialized reference (or `null`) fits any reference
    /// type.
    pub fn fits(&self, expected: &VerificationType) -> bool {
        match (self, expected) {
            (VerificationType::Top, _) => false,
            (found, VerificationType::Object(_)) => {
                matches!(found, VerificationType::Null | VerificationType::Object(_))
            }
            (found, expected) => found == expected,
        }
    }

    /// Least upper bound of two types
    ///
    /// Equal types stay, `null` merges into any object type, two object types merge through the
    /// hierarchy, and anything else is `Top`.
    pub fn merge<H: ClassHierarchy + ?Sized>(
        &self,
        other: &VerificationType,
        hierarchy: &H,
    ) -> Result<VerificationType, Error> {
        let merged = match (self, other) {
            (t1, t2) if t1 == t2 => t1.clone(),
            (VerificationType::Null, VerificationType::Object(t))
            | (VerificationType::Object(t), VerificationType::Null) => {
                VerificationType::Object(t.clone())
            }
            (VerificationType::Object(t1), VerificationType::Object(t2)) => {
                VerificationType::Object(hierarchy.merge_ref_types(t1, t2)?)
            }
            _ => VerificationType::Top,
        };
        Ok(merged)
    }

    pub const OBJECT: VerificationType = VerificationType::Object(RefType::OBJECT);

    pub fn object(class: BinaryName) -> VerificationType {
        VerificationType::Object(RefType::Object(class))
    }
}

impl From<FieldType> for VerificationType {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl From<&FieldType> for VerificationType {
    fn from(field_type: &FieldType) -> Self {
        VerificationType::from(field_type.clone())
    }
}

impl Width for VerificationType {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::VerificationType::*;
    use super::*;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::Name;

    #[test]
    fn merge_rules() {
        let java = JavaLibraryHierarchy::new();
        let string = VerificationType::object(BinaryName::STRING);
        let integer = VerificationType::object(BinaryName::INTEGER);
        let long = VerificationType::object(BinaryName::from_str("java/lang/Long").unwrap());

        assert_eq!(Integer.merge(&Integer, &java).unwrap(), Integer);
        assert_eq!(Null.merge(&string, &java).unwrap(), string);
        assert_eq!(string.merge(&Null, &java).unwrap(), string);
        assert_eq!(
            integer.merge(&long, &java).unwrap(),
            VerificationType::object(BinaryName::NUMBER)
        );
        assert_eq!(Integer.merge(&Float, &java).unwrap(), Top);
        assert_eq!(Integer.merge(&string, &java).unwrap(), Top);
        assert_eq!(Long.merge(&Top, &java).unwrap(), Top);
    }

    #[test]
    fn fitting() {
        let string = VerificationType::object(BinaryName::STRING);
        assert!(Null.fits(&VerificationType::OBJECT));
        assert!(string.fits(&VerificationType::OBJECT));
        assert!(!UninitializedThis.fits(&VerificationType::OBJECT));
        assert!(!Integer.fits(&Float));
        assert!(!Top.fits(&Top));
    }
}
