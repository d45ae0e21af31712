use super::code::SynLabel;
use super::BinaryName;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Error trying to verify
    VerifierError {
        instruction: String,
        index: usize,
        kind: VerifierErrorKind,
    },

    /// Code that the analyzer refuses to handle (eg. recursive subroutines)
    Unanalyzable(String),

    /// The analysis reached a state that should be impossible (indicates a bug)
    Inconsistent(String),

    /// Two labels with the same name are placed in the code
    DuplicateLabel(SynLabel),

    /// A label is referred to but never placed
    UnplacedLabel(SynLabel),

    /// A label needs to have incompatible frames
    IncompatibleFrames(SynLabel, String, String),

    /// The type hierarchy does not know about a class
    MissingClass(BinaryName),

    /// Class file bytes that could not be parsed
    MalformedClassFile(String),
}

#[derive(Debug)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    NotArrayType,
    InvalidIndex,
    InvalidType,
    BadDescriptor(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl Error {
    /// Errors which indicate a bug rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Inconsistent(_) | Error::DuplicateLabel(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::VerifierError {
                instruction,
                index,
                kind,
            } => write!(f, "{:?} at instruction {} ({})", kind, index, instruction),
            Error::Unanalyzable(msg) => write!(f, "unanalyzable code: {}", msg),
            Error::Inconsistent(msg) => write!(f, "inconsistent analysis state: {}", msg),
            Error::DuplicateLabel(lbl) => write!(f, "label {:?} is placed twice", lbl),
            Error::UnplacedLabel(lbl) => write!(f, "label {:?} is never placed", lbl),
            Error::IncompatibleFrames(lbl, frame1, frame2) => write!(
                f,
                "incompatible frames at {:?}: {} and {}",
                lbl, frame1, frame2
            ),
            Error::MissingClass(name) => write!(f, "class {} is not in the type hierarchy", name),
            Error::MalformedClassFile(msg) => write!(f, "malformed class file: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
