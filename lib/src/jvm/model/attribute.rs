use crate::jvm::{MethodDescriptor, UnqualifiedName};

/// Class level attributes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attribute {
    /// Name of the source file the class was compiled from
    SourceFile(String),

    /// The class has already gone through coroutine instrumentation
    ///
    /// Nothing executes this: it only prevents processing the class twice and lets snapshot
    /// readers check that the frames they restore still match the code.
    Instrumented(Vec<InstrumentedMethod>),

    /// Any other attribute, kept opaque
    Unknown { name: String, data: Vec<u8> },
}

/// Summary of one instrumented method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentedMethod {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub method_id: i32,
    pub method_version: i32,
    pub continuation_points: u32,
}
