mod common;

use common::*;
use coroutines::instrument::{FrameAllocator, Settings, UnitReachabilityPolicy};
use coroutines::interp::{register_allocators, CoroutineRunner, Error, FramePool, Value};
use coroutines::jvm::code::{
    ExceptionHandler, Instruction::*, InvokeType, LabelGenerator, OrdComparison,
    SynLabelGenerator,
};
use coroutines::jvm::model::Class;
use coroutines::jvm::{BaseType, BinaryName, Name};
use coroutines::snapshot;

/// Prints `started`, then calls `echo(C, i)` for `i` in `0..10`, which prints `i` and suspends
fn echo_class() -> Class {
    let mut labels = SynLabelGenerator::default();
    let top = labels.fresh_label();
    let done = labels.fresh_label();

    let run = method(
        "run",
        RUN,
        false,
        vec![
            system_out(),
            string("started"),
            println("(Ljava/lang/String;)V"),
            IConst(0),
            IStore(2),
            Label(top),
            ILoad(2),
            IConst(10),
            IfICmp(OrdComparison::GE, done),
            ALoad(0),
            ALoad(1),
            ILoad(2),
            call(InvokeType::Virtual, "me/Echo", "echo", "(Lcoroutines/user/Continuation;I)V"),
            IInc(2, 1),
            Goto(top),
            Label(done),
            Return,
        ],
    );
    let echo = method(
        "echo",
        "(Lcoroutines/user/Continuation;I)V",
        false,
        vec![
            system_out(),
            ILoad(2),
            println("(I)V"),
            ALoad(1),
            suspend(),
            Return,
        ],
    );
    class("me/Echo", vec![run, echo])
}

fn expected_echo_output() -> String {
    let mut expected = String::from("started\n");
    for i in 0..10 {
        expected.push_str(&format!("{}\n", i));
    }
    expected
}

#[test]
fn echo_runs_to_completion() {
    let classes = instrument(&[echo_class()]);
    let mut runner = runner(&classes, "me/Echo");

    for i in 0..10 {
        assert!(runner.execute().unwrap(), "execution {} suspends", i);
        assert_eq!(runner.continuation().unwrap().saved_states().len(), 2);
    }
    assert!(!runner.execute().unwrap(), "last execution returns");
    assert!(runner.continuation().unwrap().saved_states().is_empty());
    assert_eq!(runner.machine().output(), expected_echo_output());
}

#[test]
fn echo_survives_a_snapshot() {
    let classes = instrument(&[echo_class()]);
    let codec = plain_codec();

    let mut before = runner(&classes, "me/Echo");
    for _ in 0..4 {
        assert!(before.execute().unwrap());
    }
    let bytes = before.serialize(&codec).unwrap();
    let mut output = before.machine_mut().take_output();
    assert_eq!(output, "started\n0\n1\n2\n3\n");

    let mut after = CoroutineRunner::deserialize(machine(&classes), &bytes, &codec).unwrap();
    assert_eq!(after.continuation().unwrap().saved_states().len(), 2);
    assert_eq!(run_to_completion(&mut after), 6);
    output.push_str(after.machine().output());
    assert_eq!(output, expected_echo_output());
}

/// Echo instrumented with a custom allocator and the unit reachability policy
fn custom_echo_runner() -> CoroutineRunner {
    let allocator = BinaryName::from_str("me/Allocator").unwrap();
    let unit = [echo_class()];
    let mut settings = Settings::new();
    settings.frame_allocator = FrameAllocator::Custom(allocator.clone());
    settings.suspend_policy = Box::new(UnitReachabilityPolicy::new(&unit));
    settings.preserve_line_numbers = false;
    let classes = instrument_with(&unit, settings);

    let mut machine = machine(&classes);
    register_allocators(&mut machine, &allocator);
    CoroutineRunner::new(machine, &BinaryName::from_str("me/Echo").unwrap()).unwrap()
}

#[test]
fn custom_settings_behave_the_same() {
    let mut runner = custom_echo_runner();
    assert_eq!(run_to_completion(&mut runner), 10);
    assert_eq!(runner.machine().output(), expected_echo_output());

    // Each suspend saves the `run` and `echo` frames
    assert_eq!(
        runner.machine().frame_pool(),
        FramePool {
            pending: 0,
            commits: 20,
            rollbacks: 0
        },
        "every saved frame is committed"
    );
}

#[test]
fn failed_restore_rolls_back_the_allocator() {
    let mut runner = custom_echo_runner();
    assert!(runner.execute().unwrap());
    assert_eq!(runner.machine().frame_pool().commits, 2);

    runner.saved_state_mut(1).unwrap().continuation_point = 99;
    assert!(runner.execute().is_err(), "restoring a bad continuation point fails");
    let pool = runner.machine().frame_pool();
    assert_eq!(pool.rollbacks, 1, "only the frame that was loading rolls back");
    assert_eq!(pool.commits, 2);
}

#[test]
fn snapshot_needs_matching_code() {
    let classes = instrument(&[echo_class()]);
    let codec = plain_codec();
    let mut before = runner(&classes, "me/Echo");
    assert!(before.execute().unwrap());
    let bytes = before.serialize(&codec).unwrap();

    // Nothing is loaded, so none of the frames resolve
    assert!(matches!(
        CoroutineRunner::deserialize(machine(&[]), &bytes, &codec),
        Err(Error::Snapshot(snapshot::Error::NoLoadableFrame(_)))
    ));
}

/// Keeps one value of each kind in locals (and an array in two locals) across a suspend
fn prims_class() -> Class {
    let run = method(
        "run",
        RUN,
        false,
        vec![
            IConst(7),
            IStore(2),
            LConst(1 << 40),
            LStore(3),
            FConst(1.5),
            FStore(5),
            DConst(2.25),
            DStore(6),
            IConst(3),
            NewArray(BaseType::Int),
            AStore(8),
            ALoad(8),
            AStore(9),
            ALoad(1),
            suspend(),
            ILoad(2),
            record("(I)V"),
            LLoad(3),
            record("(J)V"),
            FLoad(5),
            record("(F)V"),
            DLoad(6),
            record("(D)V"),
            ALoad(8),
            IConst(0),
            IConst(42),
            IAStore,
            ALoad(9),
            IConst(0),
            IALoad,
            record("(I)V"),
            Return,
        ],
    );
    class("me/Prims", vec![run])
}

#[test]
fn locals_of_every_kind_are_restored() {
    let classes = instrument(&[prims_class()]);
    let codec = plain_codec();

    let mut before = runner(&classes, "me/Prims");
    assert!(before.execute().unwrap());
    assert!(before.machine().probes().is_empty(), "nothing recorded before the suspend");
    let bytes = before.serialize(&codec).unwrap();

    let mut after = CoroutineRunner::deserialize(machine(&classes), &bytes, &codec).unwrap();
    assert!(!after.execute().unwrap());
    assert_eq!(
        after.machine().probes(),
        &[
            Value::Int(7),
            Value::Long(1 << 40),
            Value::Float(1.5),
            Value::Double(2.25),
            Value::Int(42),
        ],
        "the two array locals still alias"
    );
}

/// Holds three monitors across a suspend, then releases them
fn locks_class() -> Class {
    let run = method(
        "run",
        RUN,
        false,
        vec![
            string("A"),
            MonitorEnter,
            string("B"),
            MonitorEnter,
            string("C"),
            MonitorEnter,
            ALoad(1),
            suspend(),
            record_monitors(),
            string("C"),
            MonitorExit,
            string("B"),
            MonitorExit,
            record_monitors(),
            string("A"),
            MonitorExit,
            Return,
        ],
    );
    class("me/Locks", vec![run])
}

#[test]
fn monitors_are_released_and_reacquired() {
    let classes = instrument(&[locks_class()]);
    let mut runner = runner(&classes, "me/Locks");

    assert!(runner.execute().unwrap());
    assert!(
        runner.machine().held_monitors().is_empty(),
        "suspending releases every monitor"
    );

    assert!(!runner.execute().unwrap());
    assert!(runner.machine().held_monitors().is_empty());
    let machine = runner.machine_mut();
    let a = machine.intern("A");
    let b = machine.intern("B");
    let c = machine.intern("C");
    assert_eq!(machine.monitor_probes(), &[vec![a, b, c], vec![a]]);
}

#[test]
fn monitors_survive_a_snapshot() {
    let classes = instrument(&[locks_class()]);
    let codec = plain_codec();
    let mut before = runner(&classes, "me/Locks");
    assert!(before.execute().unwrap());
    let bytes = before.serialize(&codec).unwrap();

    let mut after = CoroutineRunner::deserialize(machine(&classes), &bytes, &codec).unwrap();
    assert!(!after.execute().unwrap());
    let machine = after.machine_mut();
    let a = machine.intern("A");
    let b = machine.intern("B");
    let c = machine.intern("C");
    assert_eq!(machine.monitor_probes(), &[vec![a, b, c], vec![a]]);
}

#[test]
fn failed_restore_resets_the_continuation() {
    let classes = instrument(&[echo_class()]);
    let mut runner = runner(&classes, "me/Echo");
    assert!(runner.execute().unwrap());

    runner.saved_state_mut(1).unwrap().continuation_point = 99;
    match runner.execute() {
        Err(Error::Uncaught { class, .. }) => {
            assert_eq!(class, BinaryName::ILLEGALSTATEEXCEPTION)
        }
        other => panic!("expected an uncaught exception, got {:?}", other),
    }

    let continuation = runner.continuation().unwrap();
    assert_eq!(continuation.next_load(), continuation.first());
    assert_eq!(continuation.next_unload(), None);
    assert_eq!(continuation.first_cutpoint(), None);
    assert!(continuation.cutpoints().is_empty());
}

/// Suspends inside a range covered by a catch-all handler, then divides by zero in that range
fn guarded_class() -> Class {
    let mut labels = SynLabelGenerator::default();
    let start = labels.fresh_label();
    let end = labels.fresh_label();
    let handler = labels.fresh_label();

    let run = method_with_handlers(
        "run",
        RUN,
        false,
        vec![
            Label(start),
            ALoad(1),
            suspend(),
            IConst(1),
            IConst(0),
            IDiv,
            record("(I)V"),
            Label(end),
            Return,
            Label(handler),
            Pop,
            IConst(99),
            record("(I)V"),
            Return,
        ],
        vec![ExceptionHandler {
            start,
            end,
            handler,
            catch_type: None,
        }],
    );
    class("me/Guarded", vec![run])
}

#[test]
fn handlers_around_a_suspend_still_catch() {
    let classes = instrument(&[guarded_class()]);
    let codec = plain_codec();

    let mut before = runner(&classes, "me/Guarded");
    assert!(before.execute().unwrap());
    assert!(before.machine().probes().is_empty());
    let bytes = before.serialize(&codec).unwrap();

    let mut after = CoroutineRunner::deserialize(machine(&classes), &bytes, &codec).unwrap();
    assert!(!after.execute().unwrap(), "the handler returns normally");
    assert_eq!(after.machine().probes(), &[Value::Int(99)]);
    assert!(
        after.continuation().unwrap().saved_states().is_empty(),
        "the handler does not leave frames behind"
    );
}

/// `run` keeps a long under the call to `inner`, which suspends twice with different values on
/// its own stack
fn nested_class() -> Class {
    let run = method(
        "run",
        RUN,
        false,
        vec![
            LConst(10),
            ALoad(1),
            call(InvokeType::Static, "me/Nested", "inner", "(Lcoroutines/user/Continuation;)J"),
            LAdd,
            record("(J)V"),
            Return,
        ],
    );
    let inner = method(
        "inner",
        "(Lcoroutines/user/Continuation;)J",
        true,
        vec![
            FConst(2.5),
            ALoad(0),
            suspend(),
            record("(F)V"),
            AConstNull,
            IConst(3),
            ALoad(0),
            suspend(),
            record("(I)V"),
            record("(Ljava/lang/Object;)V"),
            DConst(1.25),
            record("(D)V"),
            LConst(5),
            LReturn,
        ],
    );
    class("me/Nested", vec![run, inner])
}

#[test]
fn stack_values_under_nested_calls_survive_snapshots() {
    let classes = instrument(&[nested_class()]);
    let codec = plain_codec();

    let mut recorded = vec![];
    let mut current = runner(&classes, "me/Nested");
    for i in 0..2 {
        assert!(current.execute().unwrap(), "execution {} suspends", i);
        assert_eq!(current.continuation().unwrap().saved_states().len(), 2);
        recorded.extend_from_slice(current.machine().probes());
        let bytes = current.serialize(&codec).unwrap();
        current = CoroutineRunner::deserialize(machine(&classes), &bytes, &codec).unwrap();
    }
    assert!(!current.execute().unwrap());
    recorded.extend_from_slice(current.machine().probes());

    assert_eq!(
        recorded,
        vec![
            Value::Float(2.5),
            Value::Int(3),
            Value::Null,
            Value::Double(1.25),
            Value::Long(15),
        ]
    );
}
