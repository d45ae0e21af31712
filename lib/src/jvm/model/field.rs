use crate::jvm::{FieldAccessFlags, FieldType, UnqualifiedName};

/// In-memory representation of a field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
    pub access_flags: FieldAccessFlags,
}

impl Field {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}
