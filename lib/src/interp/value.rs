use crate::jvm::{BinaryName, RefType, UnqualifiedName};
use crate::runtime::{Continuation, LockState};
use crate::util::Width;
use std::collections::BTreeMap;
use std::fmt;

/// Handle to an object on the machine heap
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub(super) usize);

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Value in a local variable, on the operand stack, in a field or in an array
///
/// `long` and `double` take one stack entry but two local variable slots (the second one being
/// `Top`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(ObjRef),

    /// Unusable local variable
    Top,
}

impl Value {
    pub fn object(self) -> Option<ObjRef> {
        match self {
            Value::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Ref(_) | Value::Null)
    }
}

impl Width for Value {
    fn width(&self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Saved frame of an instrumented method (`coroutines/user/MethodState`)
#[derive(Clone, Debug, PartialEq)]
pub struct MethodState {
    pub class_name: String,
    pub method_id: i32,
    pub method_version: i32,
    pub continuation_point: i32,

    /// `LockState` object or `null`
    pub lock_state: Value,

    /// `Data` objects or `null`
    pub locals: Value,
    pub stack: Value,
}

/// Typed arrays of saved values (`coroutines/user/Data`)
///
/// Every field is an array object of the matching type, or `null` when there is nothing of that
/// type.
#[derive(Clone, Debug, PartialEq)]
pub struct DataArrays {
    pub ints: Value,
    pub longs: Value,
    pub floats: Value,
    pub doubles: Value,
    pub objects: Value,
}

/// Object on the heap
#[derive(Clone, Debug)]
pub enum HeapObject {
    String(String),
    Instance {
        class: BinaryName,
        fields: BTreeMap<UnqualifiedName, Value>,
    },
    Array {
        array_type: RefType,
        values: Vec<Value>,
    },
    Continuation(Continuation<ObjRef>),
    MethodState(MethodState),
    Data(DataArrays),
    LockState(LockState<ObjRef>),
    PrintStream,
}

impl HeapObject {
    /// Runtime class of the object, for type checks
    pub fn class_type(&self) -> RefType {
        match self {
            HeapObject::String(_) => RefType::STRING,
            HeapObject::Instance { class, .. } => RefType::Object(class.clone()),
            HeapObject::Array { array_type, .. } => array_type.clone(),
            HeapObject::Continuation(_) => RefType::Object(BinaryName::CONTINUATION),
            HeapObject::MethodState(_) => RefType::Object(BinaryName::METHODSTATE),
            HeapObject::Data(_) => RefType::Object(BinaryName::DATA),
            HeapObject::LockState(_) => RefType::Object(BinaryName::LOCKSTATE),
            HeapObject::PrintStream => RefType::Object(BinaryName::PRINTSTREAM),
        }
    }
}
