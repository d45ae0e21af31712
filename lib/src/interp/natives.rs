//! Natives backing the runtime classes, `System.out` and the test probe

use super::{Abrupt, DataArrays, Error, HeapObject, Machine, MethodState, Native, ObjRef, Value};
use crate::jvm::{BaseType, BinaryName, FieldType, RefType, UnqualifiedName};
use crate::runtime::{method, Continuation, LockState, Mode, RuntimeMembers};

type NativeResult = Result<Option<Value>, Abrupt>;

pub(super) fn register(machine: &mut Machine) {
    let members = RuntimeMembers::new();

    let continuation = members.continuation;
    machine.register_native(continuation.get_mode, get_mode);
    machine.register_native(continuation.set_mode, set_mode);
    machine.register_native(continuation.load_next_method_state, load_next_method_state);
    machine.register_native(continuation.push_new_method_state, push_new_method_state);
    machine.register_native(continuation.reset, reset);
    machine.register_native(continuation.suspend, suspend);
    machine.register_native(
        continuation.invalid_continuation_point,
        invalid_continuation_point,
    );

    let method_state = members.method_state;
    machine.register_native(method_state.create, create_method_state);
    machine.register_native(method_state.get_continuation_point, get_continuation_point);
    machine.register_native(method_state.get_method_id, get_method_id);
    machine.register_native(method_state.get_method_version, get_method_version);
    machine.register_native(method_state.get_lock_state, get_lock_state);
    machine.register_native(method_state.get_locals, get_locals);
    machine.register_native(method_state.get_stack, get_stack);

    let data = members.data;
    machine.register_native(data.create, create_data);
    machine.register_native(data.get_ints, get_ints);
    machine.register_native(data.get_longs, get_longs);
    machine.register_native(data.get_floats, get_floats);
    machine.register_native(data.get_doubles, get_doubles);
    machine.register_native(data.get_objects, get_objects);

    let lock_state = members.lock_state;
    machine.register_native(lock_state.create, create_lock_state);
    machine.register_native(lock_state.enter, enter_lock);
    machine.register_native(lock_state.exit, exit_lock);
    machine.register_native(lock_state.to_array, lock_state_to_array);

    let printable = [
        None,
        Some(FieldType::int()),
        Some(FieldType::long()),
        Some(FieldType::float()),
        Some(FieldType::double()),
        Some(FieldType::object(BinaryName::STRING)),
        Some(FieldType::object(BinaryName::OBJECT)),
    ];
    for parameter in printable {
        let parameters = parameter.into_iter().collect();
        let target = method(
            BinaryName::PRINTSTREAM,
            UnqualifiedName::PRINTLN,
            parameters,
            None,
        );
        machine.register_native(target, println as Native);
    }

    let recordable = [
        FieldType::int(),
        FieldType::long(),
        FieldType::float(),
        FieldType::double(),
        FieldType::object(BinaryName::OBJECT),
    ];
    for parameter in recordable {
        let target = method(
            BinaryName::PROBE,
            UnqualifiedName::RECORD,
            vec![parameter],
            None,
        );
        machine.register_native(target, record_probe as Native);
    }
    machine.register_native(
        method(BinaryName::PROBE, UnqualifiedName::MONITORS, vec![], None),
        record_monitors,
    );

    machine.register_native(
        method(BinaryName::OBJECT, UnqualifiedName::INIT, vec![], None),
        object_init,
    );
}

fn arg(args: &[Value], index: usize) -> Result<Value, Abrupt> {
    match args.get(index) {
        Some(value) => Ok(*value),
        None => Err(Error::BadReference(format!("missing argument {}", index)).into()),
    }
}

fn int_arg(args: &[Value], index: usize) -> Result<i32, Abrupt> {
    match arg(args, index)? {
        Value::Int(value) => Ok(value),
        other => Err(Error::BadReference(format!("expected int, found {:?}", other)).into()),
    }
}

fn non_null(machine: &mut Machine, value: Value) -> Result<ObjRef, Abrupt> {
    match value {
        Value::Ref(obj) => Ok(obj),
        Value::Null => Err(machine.throw(BinaryName::NULLPOINTEREXCEPTION, "null reference")),
        other => Err(Error::BadReference(format!("expected reference, found {:?}", other)).into()),
    }
}

fn continuation_mut(machine: &mut Machine, value: Value) -> Result<&mut Continuation<ObjRef>, Abrupt> {
    let obj = non_null(machine, value)?;
    match machine.object_mut(obj)? {
        HeapObject::Continuation(continuation) => Ok(continuation),
        _ => Err(Error::BadReference(format!("{:?} is not a continuation", obj)).into()),
    }
}

fn method_state(machine: &mut Machine, value: Value) -> Result<&MethodState, Abrupt> {
    let obj = non_null(machine, value)?;
    match machine.object(obj)? {
        HeapObject::MethodState(state) => Ok(state),
        _ => Err(Error::BadReference(format!("{:?} is not a method state", obj)).into()),
    }
}

fn data(machine: &mut Machine, value: Value) -> Result<&DataArrays, Abrupt> {
    let obj = non_null(machine, value)?;
    match machine.object(obj)? {
        HeapObject::Data(data) => Ok(data),
        _ => Err(Error::BadReference(format!("{:?} is not a data object", obj)).into()),
    }
}

fn lock_state_mut(machine: &mut Machine, value: Value) -> Result<&mut LockState<ObjRef>, Abrupt> {
    let obj = non_null(machine, value)?;
    match machine.object_mut(obj)? {
        HeapObject::LockState(lock_state) => Ok(lock_state),
        _ => Err(Error::BadReference(format!("{:?} is not a lock state", obj)).into()),
    }
}

fn get_mode(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let mode = continuation_mut(machine, arg(args, 0)?)?.mode();
    Ok(Some(Value::Int(mode.as_int())))
}

fn set_mode(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let mode = Mode::from_int(int_arg(args, 1)?)?;
    continuation_mut(machine, arg(args, 0)?)?.set_mode(mode);
    Ok(None)
}

fn load_next_method_state(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let state = continuation_mut(machine, arg(args, 0)?)?.load_next_method_state()?;
    Ok(Some(Value::Ref(state)))
}

fn push_new_method_state(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let state = non_null(machine, arg(args, 1)?)?;
    continuation_mut(machine, arg(args, 0)?)?.push_new_method_state(state);
    Ok(None)
}

fn reset(machine: &mut Machine, args: &[Value]) -> NativeResult {
    continuation_mut(machine, arg(args, 0)?)?.reset();
    Ok(None)
}

/// Instrumented code never calls `suspend`, it replaces the call with glue
fn suspend(_machine: &mut Machine, _args: &[Value]) -> NativeResult {
    Err(Error::Unsupported(String::from("suspend() called from uninstrumented code")).into())
}

fn invalid_continuation_point(machine: &mut Machine, _args: &[Value]) -> NativeResult {
    let exception = machine.new_throwable(
        BinaryName::ILLEGALSTATEEXCEPTION,
        "Unrecognized continuation point",
    );
    Ok(Some(Value::Ref(exception)))
}

fn create_method_state(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let class_name = non_null(machine, arg(args, 0)?)?;
    let class_name = machine.string_value(class_name)?.to_owned();
    let state = MethodState {
        class_name,
        method_id: int_arg(args, 1)?,
        method_version: int_arg(args, 2)?,
        continuation_point: int_arg(args, 3)?,
        lock_state: arg(args, 4)?,
        locals: arg(args, 5)?,
        stack: arg(args, 6)?,
    };
    Ok(Some(Value::Ref(machine.alloc(HeapObject::MethodState(state)))))
}

macro_rules! getter {
    ($name:ident, $access:ident, $field:ident) => {
        fn $name(machine: &mut Machine, args: &[Value]) -> NativeResult {
            let value = $access(machine, arg(args, 0)?)?.$field;
            Ok(Some(value))
        }
    };
    ($name:ident, $access:ident, $field:ident, Int) => {
        fn $name(machine: &mut Machine, args: &[Value]) -> NativeResult {
            let value = $access(machine, arg(args, 0)?)?.$field;
            Ok(Some(Value::Int(value)))
        }
    };
}

getter!(get_continuation_point, method_state, continuation_point, Int);
getter!(get_method_id, method_state, method_id, Int);
getter!(get_method_version, method_state, method_version, Int);
getter!(get_lock_state, method_state, lock_state);
getter!(get_locals, method_state, locals);
getter!(get_stack, method_state, stack);
getter!(get_ints, data, ints);
getter!(get_longs, data, longs);
getter!(get_floats, data, floats);
getter!(get_doubles, data, doubles);
getter!(get_objects, data, objects);

fn create_data(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let data = DataArrays {
        ints: arg(args, 0)?,
        longs: arg(args, 1)?,
        floats: arg(args, 2)?,
        doubles: arg(args, 3)?,
        objects: arg(args, 4)?,
    };
    Ok(Some(Value::Ref(machine.alloc(HeapObject::Data(data)))))
}

fn create_lock_state(machine: &mut Machine, _args: &[Value]) -> NativeResult {
    let lock_state = machine.alloc(HeapObject::LockState(LockState::new()));
    Ok(Some(Value::Ref(lock_state)))
}

fn enter_lock(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let monitor = non_null(machine, arg(args, 1)?)?;
    lock_state_mut(machine, arg(args, 0)?)?.enter(monitor);
    Ok(None)
}

fn exit_lock(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let monitor = non_null(machine, arg(args, 1)?)?;
    if !lock_state_mut(machine, arg(args, 0)?)?.exit(&monitor) {
        log::warn!("Lock state did not record monitor {:?}", monitor);
    }
    Ok(None)
}

fn lock_state_to_array(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let held = lock_state_mut(machine, arg(args, 0)?)?.to_vec();
    let array = machine.alloc(HeapObject::Array {
        array_type: RefType::array(FieldType::object(BinaryName::OBJECT)),
        values: held.into_iter().map(Value::Ref).collect(),
    });
    Ok(Some(Value::Ref(array)))
}

fn println(machine: &mut Machine, args: &[Value]) -> NativeResult {
    let line = match args.get(1) {
        Some(value) => machine.render(*value)?,
        None => String::new(),
    };
    machine.write_line(&line);
    Ok(None)
}

fn record_probe(machine: &mut Machine, args: &[Value]) -> NativeResult {
    machine.record_probe(arg(args, 0)?);
    Ok(None)
}

fn record_monitors(machine: &mut Machine, _args: &[Value]) -> NativeResult {
    machine.record_monitors();
    Ok(None)
}

fn object_init(_machine: &mut Machine, _args: &[Value]) -> NativeResult {
    Ok(None)
}

/// Allocators for a custom allocator class (`allocateIntArray(I)[I` and friends), along with
/// its `commit()V` and `rollback()V`
///
/// Arrays stay pending in the machine's [`FramePool`](super::FramePool) until a commit or
/// rollback settles them.
pub fn register_allocators(machine: &mut Machine, class: &BinaryName) {
    let element_types = [
        FieldType::int(),
        FieldType::long(),
        FieldType::float(),
        FieldType::double(),
        FieldType::object(BinaryName::OBJECT),
    ];
    for element_type in element_types {
        let native: Native = match element_type {
            FieldType::Base(BaseType::Int) => allocate_ints,
            FieldType::Base(BaseType::Long) => allocate_longs,
            FieldType::Base(BaseType::Float) => allocate_floats,
            FieldType::Base(BaseType::Double) => allocate_doubles,
            _ => allocate_objects,
        };
        machine.register_native(RuntimeMembers::allocator(class, &element_type), native);
    }
    machine.register_native(RuntimeMembers::allocator_commit(class), commit_frames);
    machine.register_native(RuntimeMembers::allocator_rollback(class), rollback_frames);
}

fn commit_frames(machine: &mut Machine, _args: &[Value]) -> NativeResult {
    let pool = machine.frame_pool_mut();
    log::trace!("Committing {} frame arrays", pool.pending);
    pool.pending = 0;
    pool.commits += 1;
    Ok(None)
}

fn rollback_frames(machine: &mut Machine, _args: &[Value]) -> NativeResult {
    let pool = machine.frame_pool_mut();
    log::trace!("Rolling back {} frame arrays", pool.pending);
    pool.pending = 0;
    pool.rollbacks += 1;
    Ok(None)
}

fn allocate(machine: &mut Machine, args: &[Value], element_type: FieldType) -> NativeResult {
    let count = int_arg(args, 0)?;
    let array = machine.allocate_array(RefType::array(element_type), count)?;
    machine.frame_pool_mut().pending += 1;
    Ok(Some(Value::Ref(array)))
}

fn allocate_ints(machine: &mut Machine, args: &[Value]) -> NativeResult {
    allocate(machine, args, FieldType::int())
}

fn allocate_longs(machine: &mut Machine, args: &[Value]) -> NativeResult {
    allocate(machine, args, FieldType::long())
}

fn allocate_floats(machine: &mut Machine, args: &[Value]) -> NativeResult {
    allocate(machine, args, FieldType::float())
}

fn allocate_doubles(machine: &mut Machine, args: &[Value]) -> NativeResult {
    allocate(machine, args, FieldType::double())
}

fn allocate_objects(machine: &mut Machine, args: &[Value]) -> NativeResult {
    allocate(machine, args, FieldType::object(BinaryName::OBJECT))
}
