use crate::jvm::code::{Code, Instruction, MethodRef};
use crate::jvm::model::{Class, Method};
use crate::jvm::verifier::{Analysis, Frame};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::util::Width;
use std::collections::HashSet;

/// Decides which calls can suspend
pub trait SuspendPolicy: Send + Sync {
    fn is_continuation_point(&self, method: &MethodRef) -> bool;
}

/// Is this `coroutines/user/Continuation.suspend()V`?
pub fn is_suspend(method: &MethodRef) -> bool {
    method.class == BinaryName::CONTINUATION
        && method.name == UnqualifiedName::SUSPEND
        && method.descriptor.parameters.is_empty()
        && method.descriptor.return_type.is_none()
}

/// Calls that can suspend are those which take a continuation
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinuationParameterPolicy;

impl SuspendPolicy for ContinuationParameterPolicy {
    fn is_continuation_point(&self, method: &MethodRef) -> bool {
        is_suspend(method)
            || method
                .descriptor
                .has_object_parameter(&BinaryName::CONTINUATION)
    }
}

/// Calls that can suspend are those which reach `suspend` without leaving a unit of classes
///
/// Methods marked with `@Suspendable` are assumed to suspend. Calls are matched on the exact
/// class named in the instruction, so a call through a super type only counts if the super type
/// method itself reaches a suspension.
#[derive(Debug, Default, Clone)]
pub struct UnitReachabilityPolicy {
    suspendable: HashSet<(BinaryName, UnqualifiedName, MethodDescriptor)>,
}

impl UnitReachabilityPolicy {
    pub fn new<'c>(classes: impl IntoIterator<Item = &'c Class>) -> UnitReachabilityPolicy {
        let methods: Vec<(&BinaryName, &Method)> = classes
            .into_iter()
            .flat_map(|class| class.methods.iter().map(move |method| (&class.name, method)))
            .collect();

        let key = |class: &BinaryName, method: &Method| {
            (class.clone(), method.name.clone(), method.descriptor.clone())
        };
        let mut suspendable: HashSet<_> = methods
            .iter()
            .filter(|(_, method)| method.has_annotation(&BinaryName::SUSPENDABLE))
            .map(|(class, method)| key(*class, *method))
            .collect();

        // Grow the set until no new caller is found
        loop {
            let mut changed = false;
            for (class, method) in &methods {
                let method_key = key(*class, *method);
                if suspendable.contains(&method_key) {
                    continue;
                }
                let reaches = method.code.as_ref().map_or(false, |code| {
                    code.instructions.iter().any(|insn| match insn {
                        Instruction::Invoke(_, callee) => {
                            is_suspend(callee)
                                || suspendable.contains(&(
                                    callee.class.clone(),
                                    callee.name.clone(),
                                    callee.descriptor.clone(),
                                ))
                        }
                        _ => false,
                    })
                });
                if reaches {
                    suspendable.insert(method_key);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        log::debug!("{} methods in the unit can suspend", suspendable.len());
        UnitReachabilityPolicy { suspendable }
    }
}

impl SuspendPolicy for UnitReachabilityPolicy {
    fn is_continuation_point(&self, method: &MethodRef) -> bool {
        is_suspend(method)
            || self.suspendable.contains(&(
                method.class.clone(),
                method.name.clone(),
                method.descriptor.clone(),
            ))
    }
}

/// How execution resumes after a continuation point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointKind {
    /// Call to `suspend`, which gets replaced entirely
    Suspend,

    /// Call to another method that can suspend, which is re-entered when restoring
    Invoke,
}

/// Call which may suspend the coroutine
#[derive(Clone, Debug)]
pub struct ContinuationPoint {
    /// Position in the numbering of continuation points of the method
    pub id: u32,

    /// Index of the call in the instruction list
    pub index: usize,

    pub kind: PointKind,

    /// Frame before the call
    pub frame: Frame,

    /// Indices into the exception table of handlers covering the call
    pub handlers: Vec<usize>,
}

/// Calls in the code that the policy considers continuation points
pub fn continuation_calls<'a>(
    code: &'a Code,
    policy: &'a dyn SuspendPolicy,
) -> impl Iterator<Item = (usize, &'a MethodRef)> + 'a {
    code.instructions
        .iter()
        .enumerate()
        .filter_map(move |(index, insn)| match insn {
            Instruction::Invoke(_, method) if policy.is_continuation_point(method) => {
                Some((index, method))
            }
            _ => None,
        })
}

/// Slot of the first continuation parameter of a method
pub fn continuation_parameter_slot(method: &Method) -> Option<u16> {
    let continuation = FieldType::Ref(RefType::Object(BinaryName::CONTINUATION));
    let mut slot = if method.is_static() { 0 } else { 1 };
    for parameter in &method.descriptor.parameters {
        if parameter == &continuation {
            return u16::try_from(slot).ok();
        }
        slot += parameter.width();
    }
    None
}

/// Does the method need to go through instrumentation (and its checks)?
pub fn is_candidate(method: &Method, policy: &dyn SuspendPolicy) -> bool {
    continuation_parameter_slot(method).is_some()
        || method
            .code
            .as_ref()
            .map_or(false, |code| continuation_calls(code, policy).next().is_some())
}

/// Reachable continuation points of analyzed code, in instruction order
///
/// Unreachable calls are left alone (there is no frame to save there).
pub fn locate(
    code: &Code,
    analysis: &Analysis,
    policy: &dyn SuspendPolicy,
) -> Vec<ContinuationPoint> {
    let mut points = vec![];
    for (index, method) in continuation_calls(code, policy) {
        let frame = match &analysis.frames[index] {
            Some(frame) => frame.clone(),
            None => {
                log::warn!(
                    "Skipping unreachable continuation point at {} ({})",
                    index,
                    method.pretty()
                );
                continue;
            }
        };
        let kind = if is_suspend(method) {
            PointKind::Suspend
        } else {
            PointKind::Invoke
        };
        points.push(ContinuationPoint {
            id: points.len() as u32,
            index,
            kind,
            frame,
            handlers: analysis.handlers[index].clone(),
        });
    }
    points
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::InvokeType;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, Name, ParseDescriptor};

    fn call(class: &str, name: &str, descriptor: &str) -> MethodRef {
        MethodRef::new(
            BinaryName::from_str(class).unwrap(),
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
        )
    }

    fn method(name: &str, descriptor: &str, calls: Vec<MethodRef>) -> Method {
        let mut instructions: Vec<Instruction> = calls
            .into_iter()
            .map(|callee| Instruction::Invoke(InvokeType::Static, callee))
            .collect();
        instructions.push(Instruction::Return);
        Method::new(
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
            Some(Code::new(instructions, vec![])),
        )
    }

    #[test]
    fn parameter_policy() {
        let policy = ContinuationParameterPolicy;
        assert!(policy.is_continuation_point(&call(
            "coroutines/user/Continuation",
            "suspend",
            "()V"
        )));
        assert!(policy.is_continuation_point(&call(
            "me/Echo",
            "echo",
            "(ILcoroutines/user/Continuation;)V"
        )));
        assert!(!policy.is_continuation_point(&call("me/Echo", "echo", "(I)V")));
        assert!(!policy.is_continuation_point(&call(
            "coroutines/user/Continuation",
            "getMode",
            "()I"
        )));

        let echo = method("echo", "(JLcoroutines/user/Continuation;)V", vec![]);
        assert_eq!(continuation_parameter_slot(&echo), Some(2));
        assert!(is_candidate(&echo, &policy), "has a continuation parameter");
    }

    #[test]
    fn reachability_policy() {
        let suspend = call("coroutines/user/Continuation", "suspend", "()V");
        let mut class = Class::new(BinaryName::from_str("me/Unit").unwrap(), ClassAccessFlags::PUBLIC);
        class.add_method(method("leaf", "()V", vec![suspend]));
        class.add_method(method("middle", "()V", vec![call("me/Unit", "leaf", "()V")]));
        class.add_method(method("top", "()V", vec![call("me/Unit", "middle", "()V")]));
        class.add_method(method("unrelated", "()V", vec![call("me/Unit", "other", "()V")]));
        let mut marked = method("external", "()V", vec![]);
        marked.annotations.push(BinaryName::SUSPENDABLE);
        class.add_method(marked);

        let policy = UnitReachabilityPolicy::new([&class]);
        assert!(policy.is_continuation_point(&call("me/Unit", "middle", "()V")));
        assert!(policy.is_continuation_point(&call("me/Unit", "top", "()V")));
        assert!(policy.is_continuation_point(&call("me/Unit", "external", "()V")));
        assert!(!policy.is_continuation_point(&call("me/Unit", "unrelated", "()V")));
        assert!(!policy.is_continuation_point(&call("me/Unit", "top", "(I)V")));
    }
}
