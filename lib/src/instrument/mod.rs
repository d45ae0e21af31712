//! Rewrite methods so they can suspend and resume
//!
//! A method is rewritten when it takes a `coroutines/user/Continuation` parameter and contains
//! at least one continuation point, meaning a call which the [`SuspendPolicy`] says may suspend.
//! The rewritten method saves its frame into the continuation when a callee suspends, and
//! restores that frame on re-entry when the continuation is loading. See the synthesizer module
//! for the exact shape of the generated code.
//!
//! ### Example
//!
//! ```
//! use coroutines::instrument::{Instrumenter, Settings};
//! use coroutines::jvm::class_graph::JavaLibraryHierarchy;
//! use coroutines::jvm::code::{Code, Instruction::*, InvokeType, MethodRef};
//! use coroutines::jvm::model::{Class, Method};
//! use coroutines::jvm::*;
//!
//! let suspend = MethodRef::new(
//!     BinaryName::CONTINUATION,
//!     UnqualifiedName::SUSPEND,
//!     MethodDescriptor::parse("()V").unwrap(),
//! );
//! let mut class = Class::new(BinaryName::from_str("me/Echo").unwrap(), ClassAccessFlags::PUBLIC);
//! class.add_method(Method::new(
//!     UnqualifiedName::RUN,
//!     MethodDescriptor::parse("(Lcoroutines/user/Continuation;)V").unwrap(),
//!     MethodAccessFlags::STATIC,
//!     Some(Code::new(vec![ALoad(0), Invoke(InvokeType::Virtual, suspend), Return], vec![])),
//! ));
//!
//! let java = JavaLibraryHierarchy::new();
//! let instrumenter = Instrumenter::new(Settings::new(), &java);
//! let instrumented = instrumenter.instrument_class(&class).unwrap();
//! assert!(coroutines::instrument::marker::is_marked(&instrumented));
//! ```

mod errors;
mod locator;
pub mod marker;
mod settings;
mod synthesizer;
mod variables;

pub use errors::*;
pub use locator::*;
pub use settings::*;
pub use synthesizer::*;
pub use variables::*;

use crate::jvm::class_graph::{ClassHierarchy, ClassModelHierarchy, CompositeHierarchy};
use crate::jvm::code::Instruction;
use crate::jvm::model::{Class, InstrumentedMethod, Method};
use crate::jvm::verifier::{compute_metadata, inline_subroutines, Analyzer};
use crate::jvm::BinaryName;
use crate::runtime::RuntimeMembers;

/// Instrumented version of a method
#[derive(Debug)]
pub struct Rewritten {
    pub method: Method,

    /// What gets recorded in the class marker
    pub summary: InstrumentedMethod,
}

/// Instruments classes
///
/// The hierarchy is used to merge types while analyzing code. The class being instrumented is
/// always added in front of it, so it only needs to know about other classes.
pub struct Instrumenter<'h> {
    settings: Settings,
    hierarchy: &'h dyn ClassHierarchy,
    members: RuntimeMembers,
}

impl<'h> Instrumenter<'h> {
    pub fn new(settings: Settings, hierarchy: &'h dyn ClassHierarchy) -> Instrumenter<'h> {
        Instrumenter {
            settings,
            hierarchy,
            members: RuntimeMembers::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Instrument every method of a class that needs it
    ///
    /// Classes that were already instrumented are returned unchanged. If nothing in the class
    /// needs instrumenting, the output is equal to the input (and not marked).
    pub fn instrument_class(&self, class: &Class) -> Result<Class, Error> {
        if marker::is_marked(class) {
            log::debug!("Skipping {}: already instrumented", class.name);
            return Ok(class.clone());
        }

        let unit = ClassModelHierarchy::new([class]);
        let hierarchy = CompositeHierarchy::new().with(unit).with(self.hierarchy);

        let mut output = class.clone();
        let mut summaries = vec![];
        for method in &mut output.methods {
            if let Some(rewritten) = self.rewrite_method(&class.name, method, &hierarchy)? {
                *method = rewritten.method;
                summaries.push(rewritten.summary);
            }
        }

        if !summaries.is_empty() {
            log::info!(
                "Instrumented {} method(s) in {}",
                summaries.len(),
                class.name
            );
            marker::mark(&mut output, summaries);
        }
        Ok(output)
    }

    /// Instrument one method of a class
    ///
    /// Returns `None` if the method is left as is, which includes methods of a class that was
    /// already instrumented.
    pub fn instrument_method(
        &self,
        class: &Class,
        method: &Method,
    ) -> Result<Option<Rewritten>, Error> {
        if marker::is_marked(class) || marker::is_method_marked(class, method) {
            log::debug!("Skipping {}.{}: already instrumented", class.name, method.name);
            return Ok(None);
        }

        let unit = ClassModelHierarchy::new([class]);
        let hierarchy = CompositeHierarchy::new().with(unit).with(self.hierarchy);
        self.rewrite_method(&class.name, method, &hierarchy)
    }

    fn rewrite_method(
        &self,
        class_name: &BinaryName,
        method: &Method,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<Option<Rewritten>, Error> {
        let code = match &method.code {
            Some(code) => code,
            None => return Ok(None),
        };
        let policy = self.settings.suspend_policy.as_ref();
        if !is_candidate(method, policy) {
            return Ok(None);
        }

        let location = format!("{}.{}", class_name, method.signature());
        if code.contains(|insn| matches!(insn, Instruction::InvokeDynamic(_))) {
            return Err(Error::DynamicCallSite(location));
        }
        if method.is_constructor() {
            return Err(Error::Constructor(location));
        }
        if continuation_calls(code, policy).next().is_none() {
            log::trace!("{} has no continuation points", location);
            return Ok(None);
        }
        let continuation_slot = continuation_parameter_slot(method)
            .ok_or_else(|| Error::MissingContinuationParameter(location.clone()))?;

        let code = inline_subroutines(code)
            .map_err(|err| Error::from_analysis(location.clone(), err))?;
        let analysis = Analyzer::new(hierarchy)
            .analyze_code(
                class_name,
                &method.name,
                &method.descriptor,
                method.is_static(),
                &code,
            )
            .map_err(|err| Error::from_analysis(location.clone(), err))?;

        let points = locate(&code, &analysis, policy);
        if points.is_empty() {
            log::debug!("{} has no reachable continuation points", location);
            return Ok(None);
        }
        if let Some(point) = points.iter().find(|point| point.frame.has_uninitialized()) {
            return Err(Error::UninitializedOnStack {
                method: location,
                instruction: point.index,
            });
        }

        let method_id = marker::method_id(method);
        let method_version = marker::method_version(&code);
        let plan = MethodPlan {
            class_name,
            method,
            code: &code,
            analysis: &analysis,
            points: &points,
            continuation_slot,
            method_id,
            method_version,
        };
        let instrumented = synthesize(&self.settings, &self.members, &plan)
            .map_err(|err| Error::from_generated(location.clone(), err))?;

        let mut rewritten = method.clone();
        rewritten.code = Some(instrumented);
        compute_metadata(class_name, &mut rewritten, hierarchy)
            .map_err(|err| Error::from_generated(location.clone(), err))?;

        log::debug!(
            "Instrumented {} with {} continuation point(s)",
            location,
            points.len()
        );
        let summary = InstrumentedMethod {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            method_id,
            method_version,
            continuation_points: points.len() as u32,
        };
        Ok(Some(Rewritten {
            method: rewritten,
            summary,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{Code, InvokeDynamicRef, InvokeType, MethodRef};
    use crate::jvm::{
        ClassAccessFlags, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, RefType,
        UnqualifiedName,
    };

    fn suspend() -> Instruction {
        Invoke(
            InvokeType::Virtual,
            MethodRef::new(
                BinaryName::CONTINUATION,
                UnqualifiedName::SUSPEND,
                MethodDescriptor::parse("()V").unwrap(),
            ),
        )
    }

    fn class_with(
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
        code: Vec<Instruction>,
    ) -> Class {
        let mut class = Class::new(
            BinaryName::from_str("me/Test").unwrap(),
            ClassAccessFlags::PUBLIC,
        );
        class.add_method(Method::new(
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            flags,
            Some(Code::new(code, vec![])),
        ));
        class
    }

    #[test]
    fn rejections() {
        let java = JavaLibraryHierarchy::new();
        let instrumenter = Instrumenter::new(Settings::new(), &java);

        let indy = class_with(
            "run",
            "(Lcoroutines/user/Continuation;)V",
            MethodAccessFlags::STATIC,
            vec![
                InvokeDynamic(InvokeDynamicRef {
                    name: UnqualifiedName::RUN,
                    descriptor: MethodDescriptor::parse("()Ljava/lang/Runnable;").unwrap(),
                }),
                Pop,
                ALoad(0),
                suspend(),
                Return,
            ],
        );
        let err = instrumenter.instrument_class(&indy).unwrap_err();
        assert!(err.is_input_rejection());
        assert!(
            err.to_string().contains("dynamic call-sites are not allowed"),
            "{}",
            err
        );

        let constructor = class_with(
            "<init>",
            "(Lcoroutines/user/Continuation;)V",
            MethodAccessFlags::PUBLIC,
            vec![ALoad(1), suspend(), Return],
        );
        let err = instrumenter.instrument_class(&constructor).unwrap_err();
        assert_eq!(
            err.to_string(),
            "me/Test.<init>(Lcoroutines/user/Continuation;)V: instrumentation of constructors not allowed"
        );
    }

    #[test]
    fn untouched_methods() {
        let java = JavaLibraryHierarchy::new();
        let instrumenter = Instrumenter::new(Settings::new(), &java);

        // Continuation parameter, but nothing that suspends
        let plain = class_with(
            "run",
            "(Lcoroutines/user/Continuation;)V",
            MethodAccessFlags::STATIC,
            vec![Return],
        );
        assert_eq!(instrumenter.instrument_class(&plain).unwrap(), plain);

        // Continuation point only in dead code
        let dead = class_with(
            "run",
            "(Lcoroutines/user/Continuation;)V",
            MethodAccessFlags::STATIC,
            vec![Return, ALoad(0), suspend(), Return],
        );
        assert_eq!(instrumenter.instrument_class(&dead).unwrap(), dead);
    }

    #[test]
    fn missing_continuation_parameter() {
        let java = JavaLibraryHierarchy::new();
        let instrumenter = Instrumenter::new(Settings::new(), &java);
        let other = MethodRef::new(
            BinaryName::from_str("me/Other").unwrap(),
            UnqualifiedName::RUN,
            MethodDescriptor::parse("(Lcoroutines/user/Continuation;)V").unwrap(),
        );
        let class = class_with(
            "run",
            "()V",
            MethodAccessFlags::STATIC,
            vec![
                AConstNull,
                CheckCast(RefType::Object(BinaryName::CONTINUATION)),
                Invoke(InvokeType::Static, other),
                Return,
            ],
        );
        let err = instrumenter.instrument_class(&class).unwrap_err();
        assert!(matches!(err, Error::MissingContinuationParameter(_)), "{}", err);
    }

    #[test]
    fn idempotent() {
        let java = JavaLibraryHierarchy::new();
        let instrumenter = Instrumenter::new(Settings::new(), &java);
        let class = class_with(
            "run",
            "(Lcoroutines/user/Continuation;)V",
            MethodAccessFlags::STATIC,
            vec![ALoad(0), suspend(), Return],
        );

        let once = instrumenter.instrument_class(&class).unwrap();
        assert_ne!(once, class);
        assert!(marker::is_method_marked(&once, &class.methods[0]));
        let twice = instrumenter.instrument_class(&once).unwrap();
        assert_eq!(once, twice, "instrumenting twice changes nothing");

        let rewritten = instrumenter
            .instrument_method(&class, &class.methods[0])
            .unwrap()
            .unwrap();
        assert_eq!(rewritten.summary.continuation_points, 1);
        assert_eq!(Some(&rewritten.method), once.methods.first());

        let again = instrumenter.instrument_method(&once, &once.methods[0]).unwrap();
        assert!(again.is_none(), "methods of a marked class are left alone");
    }
}
