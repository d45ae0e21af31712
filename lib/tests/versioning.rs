mod common;

use common::*;
use coroutines::interp::{CoroutineRunner, Value};
use coroutines::jvm::code::Instruction::*;
use coroutines::jvm::model::Class;
use coroutines::snapshot::{Error, FrameKey, FrameUpdatePoint, SnapshotCodec};

/// Prints `first`, suspends, then prints `second`
fn counter(first: &str, second: &str) -> Class {
    let run = method(
        "run",
        RUN,
        false,
        vec![
            system_out(),
            string(first),
            println("(Ljava/lang/String;)V"),
            ALoad(1),
            suspend(),
            system_out(),
            string(second),
            println("(Ljava/lang/String;)V"),
            Return,
        ],
    );
    class("me/Counter", vec![run])
}

struct Versions {
    old: Vec<Class>,
    new: Vec<Class>,
    old_key: FrameKey,
    new_key: FrameKey,
}

fn versions() -> Versions {
    let old = instrument(&[counter("one", "two")]);
    let new = instrument(&[counter("ONE", "TWO")]);
    let old_key = first_point(&old[0], "run");
    let new_key = first_point(&new[0], "run");
    Versions {
        old,
        new,
        old_key,
        new_key,
    }
}

fn upgrade(versions: &Versions) -> SnapshotCodec<Value> {
    let new_key = versions.new_key.clone();
    let rule = FrameUpdatePoint::new(versions.old_key.clone(), move |mut frame| {
        frame.set_key(new_key.clone());
        frame
    });
    SnapshotCodec::new(vec![], vec![rule]).unwrap()
}

#[test]
fn versions_differ_only_by_code() {
    let versions = versions();
    assert_eq!(versions.old_key.method_id, versions.new_key.method_id);
    assert_ne!(versions.old_key.method_version, versions.new_key.method_version);
}

#[test]
fn snapshot_moves_to_new_code() {
    let versions = versions();
    let codec = upgrade(&versions);

    let mut before = runner(&versions.old, "me/Counter");
    assert!(before.execute().unwrap());
    assert_eq!(before.machine().output(), "one\n");
    let bytes = before.serialize(&codec).unwrap();

    let mut after = CoroutineRunner::deserialize(machine(&versions.new), &bytes, &codec).unwrap();
    assert!(!after.execute().unwrap());
    assert_eq!(after.machine().output(), "TWO\n");
}

#[test]
fn snapshot_still_loads_into_old_code() {
    let versions = versions();
    let codec = upgrade(&versions);

    let mut before = runner(&versions.old, "me/Counter");
    assert!(before.execute().unwrap());
    let bytes = before.serialize(&codec).unwrap();

    let mut after = CoroutineRunner::deserialize(machine(&versions.old), &bytes, &codec).unwrap();
    assert!(!after.execute().unwrap());
    assert_eq!(after.machine().output(), "two\n");
}

#[test]
fn plain_snapshot_does_not_load_into_new_code() {
    let versions = versions();
    let codec = plain_codec();

    let mut before = runner(&versions.old, "me/Counter");
    assert!(before.execute().unwrap());
    let bytes = before.serialize(&codec).unwrap();

    let result = CoroutineRunner::deserialize(machine(&versions.new), &bytes, &codec);
    assert!(result.is_err(), "old frames need an update rule");
}

#[test]
fn two_rules_for_one_key() {
    let versions = versions();
    let rule = |key: FrameKey| FrameUpdatePoint::<Value>::new(versions.old_key.clone(), move |mut frame| {
        frame.set_key(key.clone());
        frame
    });
    let result = SnapshotCodec::new(
        vec![],
        vec![rule(versions.new_key.clone()), rule(versions.new_key.clone())],
    );
    assert!(matches!(result, Err(Error::DuplicateRule(key)) if key == versions.old_key));
}
