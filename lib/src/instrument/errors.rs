use crate::jvm;
use crate::jvm::BinaryName;
use std::fmt;

/// Reasons a method could not be instrumented
///
/// Every variant starts with the `class.method descriptor` of the method being processed.
#[derive(Debug)]
pub enum Error {
    /// The method uses `invokedynamic`
    DynamicCallSite(String),

    /// The method is a constructor
    Constructor(String),

    /// The method has continuation points but no continuation to save into
    MissingContinuationParameter(String),

    /// An object that is not initialized is live at a continuation point
    UninitializedOnStack { method: String, instruction: usize },

    /// The type hierarchy does not know about a class
    MissingClass { method: String, class: BinaryName },

    /// The instrumenter produced something wrong (a bug)
    Internal { method: String, error: jvm::Error },

    /// The method could not be analyzed
    Analysis { method: String, error: jvm::Error },
}

impl Error {
    /// Classify an analysis error from the given method
    pub fn from_analysis(method: String, error: jvm::Error) -> Error {
        match error {
            jvm::Error::MissingClass(class) => Error::MissingClass { method, class },
            error if error.is_internal() => Error::Internal { method, error },
            error => Error::Analysis { method, error },
        }
    }

    /// Classify an error from analyzing generated code
    ///
    /// Generated code is expected to verify, so anything but a missing class is a bug.
    pub fn from_generated(method: String, error: jvm::Error) -> Error {
        match error {
            jvm::Error::MissingClass(class) => Error::MissingClass { method, class },
            error => Error::Internal { method, error },
        }
    }

    /// Errors which indicate a bug in the instrumenter
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal { .. })
    }

    /// Errors caused by how the instrumenter was set up (rather than by the input)
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::MissingClass { .. })
    }

    /// Errors caused by input that can't be instrumented
    pub fn is_input_rejection(&self) -> bool {
        !self.is_internal() && !self.is_configuration()
    }

    pub fn method(&self) -> &str {
        match self {
            Error::DynamicCallSite(method)
            | Error::Constructor(method)
            | Error::MissingContinuationParameter(method)
            | Error::UninitializedOnStack { method, .. }
            | Error::MissingClass { method, .. }
            | Error::Internal { method, .. }
            | Error::Analysis { method, .. } => method,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DynamicCallSite(method) => {
                write!(f, "{}: dynamic call-sites are not allowed", method)
            }
            Error::Constructor(method) => {
                write!(f, "{}: instrumentation of constructors not allowed", method)
            }
            Error::MissingContinuationParameter(method) => write!(
                f,
                "{}: continuation points found but no continuation parameter",
                method
            ),
            Error::UninitializedOnStack {
                method,
                instruction,
            } => write!(
                f,
                "{}: uninitialized object live at continuation point {}",
                method, instruction
            ),
            Error::MissingClass { method, class } => {
                write!(f, "{}: class {} is not in the type hierarchy", method, class)
            }
            Error::Internal { method, error } => {
                write!(f, "{}: internal instrumentation error: {}", method, error)
            }
            Error::Analysis { method, error } => write!(f, "{}: {}", method, error),
        }
    }
}

impl std::error::Error for Error {}
