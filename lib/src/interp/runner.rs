use super::{Abrupt, DataArrays, Error, HeapObject, HeapObjectCodec, Machine, MethodState, ObjRef, Value};
use crate::jvm::code::{InvokeType, MethodRef};
use crate::jvm::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::runtime::{Continuation, LockState};
use crate::snapshot::{read_snapshot, write_snapshot, Data, Frame, MarkerResolver, SnapshotCodec};

/// Runs a coroutine object (a class with `run(Lcoroutines/user/Continuation;)V`) on a machine
///
/// Each call to [`CoroutineRunner::execute`] runs the coroutine from its entry point. Instrumented
/// methods restore whatever was saved by the previous execution, so execution picks up right
/// after the last suspend.
pub struct CoroutineRunner {
    machine: Machine,
    coroutine: ObjRef,
    continuation: ObjRef,
}

/// `run(Lcoroutines/user/Continuation;)V` on the coroutine class
fn entry_point(class: BinaryName) -> MethodRef {
    MethodRef::new(
        class,
        UnqualifiedName::RUN,
        MethodDescriptor {
            parameters: vec![FieldType::object(BinaryName::CONTINUATION)],
            return_type: None,
        },
    )
}

/// Turn an abrupt completion that reached the outside into an error
fn settle(machine: &Machine, abrupt: Abrupt) -> Error {
    match abrupt {
        Abrupt::Throw(exception) => machine.uncaught(exception),
        Abrupt::Error(err) => err,
    }
}

impl CoroutineRunner {
    /// Construct a coroutine object with its no-argument constructor
    pub fn new(mut machine: Machine, class: &BinaryName) -> Result<CoroutineRunner, Error> {
        let coroutine = machine
            .construct(class)
            .map_err(|abrupt| settle(&machine, abrupt))?;
        let continuation = machine.alloc(HeapObject::Continuation(Continuation::new()));
        Ok(CoroutineRunner {
            machine,
            coroutine,
            continuation,
        })
    }

    /// Run the coroutine until it suspends or returns
    ///
    /// Returns `true` if it suspended. An exception escaping the coroutine is an error, and the
    /// saved states are left as the generated code left them.
    pub fn execute(&mut self) -> Result<bool, Error> {
        self.continuation_mut()?.begin_cycle();

        let class = match self.machine.object(self.coroutine)? {
            HeapObject::Instance { class, .. } => class.clone(),
            _ => {
                return Err(Error::BadReference(format!(
                    "coroutine {:?} is not an instance",
                    self.coroutine
                )))
            }
        };
        let args = vec![Value::Ref(self.coroutine), Value::Ref(self.continuation)];
        if let Err(abrupt) = self
            .machine
            .invoke(InvokeType::Virtual, &entry_point(class), args)
        {
            let err = settle(&self.machine, abrupt);
            log::debug!("Coroutine failed: {}", err);
            return Err(err);
        }

        let suspended = self.continuation_mut()?.finish_cycle()?;
        Ok(suspended)
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// The coroutine object
    pub fn coroutine(&self) -> ObjRef {
        self.coroutine
    }

    pub fn continuation(&self) -> Result<&Continuation<ObjRef>, Error> {
        match self.machine.object(self.continuation)? {
            HeapObject::Continuation(continuation) => Ok(continuation),
            _ => Err(Error::BadReference(String::from("continuation was replaced"))),
        }
    }

    pub fn continuation_mut(&mut self) -> Result<&mut Continuation<ObjRef>, Error> {
        match self.machine.object_mut(self.continuation)? {
            HeapObject::Continuation(continuation) => Ok(continuation),
            _ => Err(Error::BadReference(String::from("continuation was replaced"))),
        }
    }

    /// Saved method state at an index (outermost first)
    pub fn saved_state_mut(&mut self, index: usize) -> Result<&mut MethodState, Error> {
        let state = self
            .continuation()?
            .saved_states()
            .get(index)
            .copied()
            .ok_or_else(|| Error::BadReference(format!("no saved state {}", index)))?;
        match self.machine.object_mut(state)? {
            HeapObject::MethodState(state) => Ok(state),
            _ => Err(Error::BadReference(format!("{:?} is not a method state", state))),
        }
    }

    /// Write a snapshot of the suspended coroutine
    pub fn serialize(&mut self, codec: &SnapshotCodec<Value>) -> Result<Vec<u8>, Error> {
        let states = self.continuation()?.saved_states().to_vec();
        let frames = states
            .into_iter()
            .map(|state| self.capture_frame(state))
            .collect::<Result<Vec<_>, Error>>()?;
        log::debug!("Writing snapshot with {} frames", frames.len());
        let snapshot = codec.capture(Value::Ref(self.coroutine), frames)?;

        let mut bytes = vec![];
        let mut objects = HeapObjectCodec::new(&mut self.machine, self.continuation);
        write_snapshot(&snapshot, &mut bytes, &mut objects)?;
        Ok(bytes)
    }

    /// Read a snapshot into a machine, ready to execute
    ///
    /// Every frame must resolve to code loaded in the machine (checked against the
    /// instrumentation markers of its classes).
    pub fn deserialize(
        mut machine: Machine,
        bytes: &[u8],
        codec: &SnapshotCodec<Value>,
    ) -> Result<CoroutineRunner, Error> {
        let continuation = machine.alloc(HeapObject::Continuation(Continuation::new()));
        let snapshot = {
            let mut objects = HeapObjectCodec::new(&mut machine, continuation);
            let mut reader = bytes;
            read_snapshot(&mut reader, &mut objects)?
        };
        let coroutine = snapshot
            .payload
            .object()
            .ok_or_else(|| Error::BadReference(String::from("snapshot payload is not an object")))?;

        let resolver = MarkerResolver::new(machine.classes());
        let frames = codec.restore(&snapshot, &resolver)?;
        log::debug!("Read snapshot with {} frames", frames.len());
        let states = frames
            .into_iter()
            .map(|frame| restore_frame(&mut machine, frame))
            .collect::<Result<Vec<_>, Error>>()?;

        let mut runner = CoroutineRunner {
            machine,
            coroutine,
            continuation,
        };
        runner.continuation_mut()?.set_saved_states(states);
        Ok(runner)
    }

    fn capture_frame(&self, state: ObjRef) -> Result<Frame<Value>, Error> {
        let state = match self.machine.object(state)? {
            HeapObject::MethodState(state) => state.clone(),
            _ => return Err(Error::BadReference(format!("{:?} is not a method state", state))),
        };
        let monitors = match state.lock_state {
            Value::Ref(lock_state) => match self.machine.object(lock_state)? {
                HeapObject::LockState(lock_state) => {
                    lock_state.to_vec().into_iter().map(Value::Ref).collect()
                }
                _ => {
                    return Err(Error::BadReference(format!(
                        "{:?} is not a lock state",
                        lock_state
                    )))
                }
            },
            _ => vec![],
        };
        Ok(Frame {
            monitors,
            locals: self.capture_data(state.locals)?,
            stack: self.capture_data(state.stack)?,
            class_name: state.class_name,
            method_id: state.method_id,
            method_version: state.method_version,
            continuation_point: state.continuation_point,
        })
    }

    fn capture_data(&self, data: Value) -> Result<Data<Value>, Error> {
        let arrays = match data {
            Value::Null => return Ok(Data::new()),
            Value::Ref(obj) => match self.machine.object(obj)? {
                HeapObject::Data(arrays) => arrays.clone(),
                _ => return Err(Error::BadReference(format!("{:?} is not a data object", obj))),
            },
            other => return Err(Error::BadReference(format!("{:?} is not a data object", other))),
        };

        let objects: Vec<Value> = self.elements(arrays.objects, |value| {
            value.is_reference().then_some(value)
        })?;
        let continuation_indexes = objects
            .iter()
            .enumerate()
            .filter(|(_, object)| **object == Value::Ref(self.continuation))
            .map(|(idx, _)| idx as u32)
            .collect();

        Ok(Data {
            ints: self.elements(arrays.ints, |value| match value {
                Value::Int(value) => Some(value),
                _ => None,
            })?,
            longs: self.elements(arrays.longs, |value| match value {
                Value::Long(value) => Some(value),
                _ => None,
            })?,
            floats: self.elements(arrays.floats, |value| match value {
                Value::Float(value) => Some(value),
                _ => None,
            })?,
            doubles: self.elements(arrays.doubles, |value| match value {
                Value::Double(value) => Some(value),
                _ => None,
            })?,
            objects,
            continuation_indexes,
        })
    }

    /// Elements of an array object (`null` has none)
    fn elements<T>(&self, array: Value, extract: impl Fn(Value) -> Option<T>) -> Result<Vec<T>, Error> {
        let values = match array {
            Value::Null => return Ok(vec![]),
            Value::Ref(obj) => match self.machine.object(obj)? {
                HeapObject::Array { values, .. } => values,
                _ => return Err(Error::BadReference(format!("{:?} is not an array", obj))),
            },
            other => return Err(Error::BadReference(format!("{:?} is not an array", other))),
        };
        values
            .iter()
            .map(|value| {
                extract(*value).ok_or_else(|| {
                    Error::BadReference(format!("unexpected {:?} in saved data", value))
                })
            })
            .collect()
    }
}

/// Rebuild the runtime objects for a frame read from a snapshot
fn restore_frame(machine: &mut Machine, frame: Frame<Value>) -> Result<ObjRef, Error> {
    let monitors: Vec<ObjRef> = frame.monitors.iter().filter_map(|monitor| monitor.object()).collect();
    let lock_state = machine.alloc(HeapObject::LockState(LockState::from(monitors)));
    let locals = restore_data(machine, &frame.locals);
    let stack = restore_data(machine, &frame.stack);
    let state = MethodState {
        class_name: frame.class_name,
        method_id: frame.method_id,
        method_version: frame.method_version,
        continuation_point: frame.continuation_point,
        lock_state: Value::Ref(lock_state),
        locals,
        stack,
    };
    Ok(machine.alloc(HeapObject::MethodState(state)))
}

/// Kinds without values get `null` instead of an empty array
fn restore_data(machine: &mut Machine, data: &Data<Value>) -> Value {
    let mut array = |element_type: FieldType, values: Vec<Value>| {
        if values.is_empty() {
            return Value::Null;
        }
        let array_type = RefType::array(element_type);
        Value::Ref(machine.alloc(HeapObject::Array { array_type, values }))
    };
    let arrays = DataArrays {
        ints: array(
            FieldType::Base(BaseType::Int),
            data.ints.iter().map(|value| Value::Int(*value)).collect(),
        ),
        longs: array(
            FieldType::Base(BaseType::Long),
            data.longs.iter().map(|value| Value::Long(*value)).collect(),
        ),
        floats: array(
            FieldType::Base(BaseType::Float),
            data.floats.iter().map(|value| Value::Float(*value)).collect(),
        ),
        doubles: array(
            FieldType::Base(BaseType::Double),
            data.doubles.iter().map(|value| Value::Double(*value)).collect(),
        ),
        objects: array(FieldType::object(BinaryName::OBJECT), data.objects.clone()),
    };
    Value::Ref(machine.alloc(HeapObject::Data(arrays)))
}
