#![allow(dead_code)]

use coroutines::instrument::{Instrumenter, Settings};
use coroutines::interp::{CoroutineRunner, Machine, Value};
use coroutines::jvm::class_graph::{ClassModelHierarchy, CompositeHierarchy, JavaLibraryHierarchy};
use coroutines::jvm::code::{
    Code, Constant, ExceptionHandler, FieldRef, Instruction, InvokeType, MethodRef,
};
use coroutines::jvm::model::{Attribute, Class, Method};
use coroutines::jvm::*;
use coroutines::snapshot::{FrameKey, SnapshotCodec};

pub const RUN: &str = "(Lcoroutines/user/Continuation;)V";

pub fn method(name: &str, descriptor: &str, static_method: bool, code: Vec<Instruction>) -> Method {
    method_with_handlers(name, descriptor, static_method, code, vec![])
}

pub fn method_with_handlers(
    name: &str,
    descriptor: &str,
    static_method: bool,
    code: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
) -> Method {
    let flags = if static_method {
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
    } else {
        MethodAccessFlags::PUBLIC
    };
    Method::new(
        UnqualifiedName::from_str(name).unwrap(),
        MethodDescriptor::parse(descriptor).unwrap(),
        flags,
        Some(Code::new(code, handlers)),
    )
}

/// `<init>()V` that only calls the `java/lang/Object` constructor
pub fn constructor() -> Method {
    let object_init = MethodRef::new(
        BinaryName::OBJECT,
        UnqualifiedName::INIT,
        MethodDescriptor::parse("()V").unwrap(),
    );
    method(
        "<init>",
        "()V",
        false,
        vec![
            Instruction::ALoad(0),
            Instruction::Invoke(InvokeType::Special, object_init),
            Instruction::Return,
        ],
    )
}

pub fn class(name: &str, methods: Vec<Method>) -> Class {
    let mut class = Class::new(BinaryName::from_str(name).unwrap(), ClassAccessFlags::PUBLIC);
    class.add_method(constructor());
    for method in methods {
        class.add_method(method);
    }
    class
}

pub fn call(invoke_type: InvokeType, class: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        invoke_type,
        MethodRef::new(
            BinaryName::from_str(class).unwrap(),
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
        ),
    )
}

pub fn suspend() -> Instruction {
    call(InvokeType::Virtual, "coroutines/user/Continuation", "suspend", "()V")
}

pub fn system_out() -> Instruction {
    Instruction::GetStatic(FieldRef {
        class: BinaryName::SYSTEM,
        name: UnqualifiedName::OUT,
        descriptor: FieldType::object(BinaryName::PRINTSTREAM),
    })
}

/// `println` of the value on top of the stack (`System.out` must be under it)
pub fn println(descriptor: &str) -> Instruction {
    call(InvokeType::Virtual, "java/io/PrintStream", "println", descriptor)
}

pub fn record(descriptor: &str) -> Instruction {
    call(InvokeType::Static, "coroutines/test/Probe", "record", descriptor)
}

pub fn record_monitors() -> Instruction {
    call(InvokeType::Static, "coroutines/test/Probe", "monitors", "()V")
}

pub fn string(value: &str) -> Instruction {
    Instruction::Ldc(Constant::String(value.to_owned()))
}

/// Instrument classes that may call each other
pub fn instrument(classes: &[Class]) -> Vec<Class> {
    instrument_with(classes, Settings::new())
}

pub fn instrument_with(classes: &[Class], settings: Settings) -> Vec<Class> {
    let unit = ClassModelHierarchy::new(classes);
    let hierarchy = CompositeHierarchy::new()
        .with(unit)
        .with(JavaLibraryHierarchy::new());
    let instrumenter = Instrumenter::new(settings, &hierarchy);
    classes
        .iter()
        .map(|class| instrumenter.instrument_class(class).unwrap())
        .collect()
}

pub fn machine(classes: &[Class]) -> Machine {
    let mut machine = Machine::new();
    for class in classes {
        machine.load_class(class.clone());
    }
    machine
}

pub fn runner(classes: &[Class], coroutine: &str) -> CoroutineRunner {
    CoroutineRunner::new(machine(classes), &BinaryName::from_str(coroutine).unwrap()).unwrap()
}

/// Key of the first continuation point of a marked method
pub fn first_point(class: &Class, method_name: &str) -> FrameKey {
    for attribute in &class.attributes {
        if let Attribute::Instrumented(methods) = attribute {
            for method in methods {
                if method.name.as_str() == method_name {
                    return FrameKey::new(
                        class.name.as_str(),
                        method.method_id,
                        method.method_version,
                        0,
                    );
                }
            }
        }
    }
    panic!("{} is not instrumented in {}", method_name, class.name);
}

/// Keep executing until the coroutine finishes, returning how many executions suspended
pub fn run_to_completion(runner: &mut CoroutineRunner) -> usize {
    let mut suspended = 0;
    while runner.execute().unwrap() {
        suspended += 1;
        assert!(suspended < 1000, "coroutine never finishes");
    }
    suspended
}

pub fn plain_codec() -> SnapshotCodec<Value> {
    SnapshotCodec::plain()
}
