use crate::jvm::code::{FieldRef, MethodRef};
use crate::jvm::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};

/// Members of `coroutines.user.Continuation`
pub struct ContinuationMembers {
    pub suspend: MethodRef,
    pub get_mode: MethodRef,
    pub set_mode: MethodRef,
    pub load_next_method_state: MethodRef,
    pub push_new_method_state: MethodRef,
    pub reset: MethodRef,

    /// Static factory for the exception thrown on a bad continuation point or method version
    pub invalid_continuation_point: MethodRef,
}

/// Members of `coroutines.user.MethodState`
pub struct MethodStateMembers {
    pub create: MethodRef,
    pub get_continuation_point: MethodRef,
    pub get_method_id: MethodRef,
    pub get_method_version: MethodRef,
    pub get_lock_state: MethodRef,
    pub get_locals: MethodRef,
    pub get_stack: MethodRef,
}

/// Members of `coroutines.user.Data`
pub struct DataMembers {
    pub create: MethodRef,
    pub get_ints: MethodRef,
    pub get_longs: MethodRef,
    pub get_floats: MethodRef,
    pub get_doubles: MethodRef,
    pub get_objects: MethodRef,
}

/// Members of `coroutines.user.LockState`
pub struct LockStateMembers {
    pub create: MethodRef,
    pub enter: MethodRef,
    pub exit: MethodRef,
    pub to_array: MethodRef,
}

/// Members of `java.lang.System` and `java.io.PrintStream` used for debug output
pub struct PrintMembers {
    pub out: FieldRef,
    pub println: MethodRef,
}

/// Every runtime member generated code refers to
pub struct RuntimeMembers {
    pub continuation: ContinuationMembers,
    pub method_state: MethodStateMembers,
    pub data: DataMembers,
    pub lock_state: LockStateMembers,
    pub print: PrintMembers,
}

pub(crate) fn method(
    class: BinaryName,
    name: UnqualifiedName,
    parameters: Vec<FieldType>,
    return_type: Option<FieldType>,
) -> MethodRef {
    MethodRef::new(
        class,
        name,
        MethodDescriptor {
            parameters,
            return_type,
        },
    )
}

fn int_array() -> FieldType {
    FieldType::array(FieldType::int())
}

fn long_array() -> FieldType {
    FieldType::array(FieldType::long())
}

fn float_array() -> FieldType {
    FieldType::array(FieldType::float())
}

fn double_array() -> FieldType {
    FieldType::array(FieldType::double())
}

fn object_array() -> FieldType {
    FieldType::array(FieldType::object(BinaryName::OBJECT))
}

impl ContinuationMembers {
    pub fn new() -> ContinuationMembers {
        let class = BinaryName::CONTINUATION;
        let method_state = FieldType::object(BinaryName::METHODSTATE);
        ContinuationMembers {
            suspend: method(class.clone(), UnqualifiedName::SUSPEND, vec![], None),
            get_mode: method(
                class.clone(),
                UnqualifiedName::GETMODE,
                vec![],
                Some(FieldType::int()),
            ),
            set_mode: method(
                class.clone(),
                UnqualifiedName::SETMODE,
                vec![FieldType::int()],
                None,
            ),
            load_next_method_state: method(
                class.clone(),
                UnqualifiedName::LOADNEXTMETHODSTATE,
                vec![],
                Some(method_state.clone()),
            ),
            push_new_method_state: method(
                class.clone(),
                UnqualifiedName::PUSHNEWMETHODSTATE,
                vec![method_state],
                None,
            ),
            reset: method(class.clone(), UnqualifiedName::RESET, vec![], None),
            invalid_continuation_point: method(
                class,
                UnqualifiedName::INVALIDCONTINUATIONPOINT,
                vec![],
                Some(FieldType::object(BinaryName::ILLEGALSTATEEXCEPTION)),
            ),
        }
    }
}

impl MethodStateMembers {
    pub fn new() -> MethodStateMembers {
        let class = BinaryName::METHODSTATE;
        let data = FieldType::object(BinaryName::DATA);
        MethodStateMembers {
            create: method(
                class.clone(),
                UnqualifiedName::CREATE,
                vec![
                    FieldType::object(BinaryName::STRING),
                    FieldType::int(),
                    FieldType::int(),
                    FieldType::int(),
                    FieldType::object(BinaryName::LOCKSTATE),
                    data.clone(),
                    data.clone(),
                ],
                Some(FieldType::object(BinaryName::METHODSTATE)),
            ),
            get_continuation_point: method(
                class.clone(),
                UnqualifiedName::GETCONTINUATIONPOINT,
                vec![],
                Some(FieldType::int()),
            ),
            get_method_id: method(
                class.clone(),
                UnqualifiedName::GETMETHODID,
                vec![],
                Some(FieldType::int()),
            ),
            get_method_version: method(
                class.clone(),
                UnqualifiedName::GETMETHODVERSION,
                vec![],
                Some(FieldType::int()),
            ),
            get_lock_state: method(
                class.clone(),
                UnqualifiedName::GETLOCKSTATE,
                vec![],
                Some(FieldType::object(BinaryName::LOCKSTATE)),
            ),
            get_locals: method(
                class.clone(),
                UnqualifiedName::GETLOCALS,
                vec![],
                Some(data.clone()),
            ),
            get_stack: method(class, UnqualifiedName::GETSTACK, vec![], Some(data)),
        }
    }
}

impl DataMembers {
    pub fn new() -> DataMembers {
        let class = BinaryName::DATA;
        DataMembers {
            create: method(
                class.clone(),
                UnqualifiedName::CREATE,
                vec![
                    int_array(),
                    long_array(),
                    float_array(),
                    double_array(),
                    object_array(),
                ],
                Some(FieldType::object(BinaryName::DATA)),
            ),
            get_ints: method(
                class.clone(),
                UnqualifiedName::GETINTS,
                vec![],
                Some(int_array()),
            ),
            get_longs: method(
                class.clone(),
                UnqualifiedName::GETLONGS,
                vec![],
                Some(long_array()),
            ),
            get_floats: method(
                class.clone(),
                UnqualifiedName::GETFLOATS,
                vec![],
                Some(float_array()),
            ),
            get_doubles: method(
                class.clone(),
                UnqualifiedName::GETDOUBLES,
                vec![],
                Some(double_array()),
            ),
            get_objects: method(
                class,
                UnqualifiedName::GETOBJECTS,
                vec![],
                Some(object_array()),
            ),
        }
    }
}

impl LockStateMembers {
    pub fn new() -> LockStateMembers {
        let class = BinaryName::LOCKSTATE;
        let object = FieldType::object(BinaryName::OBJECT);
        LockStateMembers {
            create: method(
                class.clone(),
                UnqualifiedName::CREATE,
                vec![],
                Some(FieldType::object(BinaryName::LOCKSTATE)),
            ),
            enter: method(
                class.clone(),
                UnqualifiedName::ENTER,
                vec![object.clone()],
                None,
            ),
            exit: method(class.clone(), UnqualifiedName::EXIT, vec![object], None),
            to_array: method(class, UnqualifiedName::TOARRAY, vec![], Some(object_array())),
        }
    }
}

impl PrintMembers {
    pub fn new() -> PrintMembers {
        PrintMembers {
            out: FieldRef {
                class: BinaryName::SYSTEM,
                name: UnqualifiedName::OUT,
                descriptor: FieldType::object(BinaryName::PRINTSTREAM),
            },
            println: method(
                BinaryName::PRINTSTREAM,
                UnqualifiedName::PRINTLN,
                vec![FieldType::object(BinaryName::STRING)],
                None,
            ),
        }
    }
}

impl RuntimeMembers {
    pub fn new() -> RuntimeMembers {
        RuntimeMembers {
            continuation: ContinuationMembers::new(),
            method_state: MethodStateMembers::new(),
            data: DataMembers::new(),
            lock_state: LockStateMembers::new(),
            print: PrintMembers::new(),
        }
    }

    /// Static allocator method for arrays of the given element type on a custom allocator class
    pub fn allocator(class: &BinaryName, element: &FieldType) -> MethodRef {
        let name = match element {
            FieldType::Base(BaseType::Int) => UnqualifiedName::ALLOCATEINTARRAY,
            FieldType::Base(BaseType::Long) => UnqualifiedName::ALLOCATELONGARRAY,
            FieldType::Base(BaseType::Float) => UnqualifiedName::ALLOCATEFLOATARRAY,
            FieldType::Base(BaseType::Double) => UnqualifiedName::ALLOCATEDOUBLEARRAY,
            _ => UnqualifiedName::ALLOCATEOBJECTARRAY,
        };
        let element = match element {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Long)
            | FieldType::Base(BaseType::Float)
            | FieldType::Base(BaseType::Double) => element.clone(),
            _ => FieldType::object(BinaryName::OBJECT),
        };
        method(
            class.clone(),
            name,
            vec![FieldType::int()],
            Some(FieldType::Ref(RefType::array(element))),
        )
    }

    /// `commit()V` on a custom allocator class, called once a frame is pushed
    pub fn allocator_commit(class: &BinaryName) -> MethodRef {
        method(class.clone(), UnqualifiedName::COMMIT, vec![], None)
    }

    /// `rollback()V` on a custom allocator class, called when loading fails
    pub fn allocator_rollback(class: &BinaryName) -> MethodRef {
        method(class.clone(), UnqualifiedName::ROLLBACK, vec![], None)
    }
}

impl Default for RuntimeMembers {
    fn default() -> Self {
        RuntimeMembers::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{Name, RenderDescriptor};

    #[test]
    fn descriptors() {
        let members = RuntimeMembers::new();
        assert_eq!(
            members.method_state.create.descriptor.render(),
            "(Ljava/lang/String;IIILcoroutines/user/LockState;Lcoroutines/user/Data;Lcoroutines/user/Data;)Lcoroutines/user/MethodState;"
        );
        assert_eq!(
            members.data.create.descriptor.render(),
            "([I[J[F[D[Ljava/lang/Object;)Lcoroutines/user/Data;"
        );
        assert_eq!(
            members.continuation.invalid_continuation_point.pretty(),
            "coroutines/user/Continuation.invalidContinuationPoint()Ljava/lang/IllegalStateException;"
        );

        let allocator = BinaryName::from_str("me/Alloc").unwrap();
        let long_alloc = RuntimeMembers::allocator(&allocator, &FieldType::long());
        assert_eq!(long_alloc.name, UnqualifiedName::ALLOCATELONGARRAY);
        assert_eq!(long_alloc.descriptor.render(), "(I)[J");
        let object_alloc = RuntimeMembers::allocator(&allocator, &FieldType::object(BinaryName::STRING));
        assert_eq!(object_alloc.descriptor.render(), "(I)[Ljava/lang/Object;");
        assert_eq!(RuntimeMembers::allocator_commit(&allocator).descriptor.render(), "()V");
        assert_eq!(RuntimeMembers::allocator_rollback(&allocator).name, UnqualifiedName::ROLLBACK);
    }
}
