//! Reference interpreter for symbolic method bodies
//!
//! The [`Machine`] runs [`crate::jvm::code::Code`] directly (labels and all), with the runtime
//! classes (`Continuation`, `MethodState`, `Data`, `LockState`) implemented as natives. It exists
//! so that instrumented code can be run end to end: suspended, snapshotted, restored and resumed.
//!
//! It is not a JVM. There is no garbage collection, no threads, no class loading beyond the
//! classes handed to it, and library classes only exist as far as the natives and the built-in
//! type hierarchy describe them.

mod codec;
mod machine;
mod natives;
mod runner;
mod value;

pub use codec::*;
pub use machine::*;
pub use natives::register_allocators;
pub use runner::*;
pub use value::*;

use crate::jvm::BinaryName;
use crate::{jvm, runtime, snapshot};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Feature the machine does not run
    Unsupported(String),

    NoSuchMethod(String),

    /// Object handle that doesn't point to the heap, or to the wrong kind of object
    BadReference(String),

    /// Code doing something the verifier would have rejected
    BadCode {
        method: String,
        index: usize,
        message: String,
    },

    /// Exception which escaped the outermost call
    Uncaught {
        class: BinaryName,
        message: Option<String>,
    },

    /// Call depth limit exceeded
    StackOverflow(usize),

    Runtime(runtime::Error),
    Jvm(jvm::Error),
    Snapshot(snapshot::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unsupported(what) => write!(f, "unsupported: {}", what),
            Error::NoSuchMethod(method) => write!(f, "no such method {}", method),
            Error::BadReference(msg) => write!(f, "bad reference: {}", msg),
            Error::BadCode {
                method,
                index,
                message,
            } => write!(f, "{} at instruction {}: {}", method, index, message),
            Error::Uncaught { class, message } => match message {
                Some(message) => write!(f, "uncaught {}: {}", class, message),
                None => write!(f, "uncaught {}", class),
            },
            Error::StackOverflow(depth) => write!(f, "call depth exceeded {}", depth),
            Error::Runtime(err) => write!(f, "runtime: {}", err),
            Error::Jvm(err) => write!(f, "{}", err),
            Error::Snapshot(err) => write!(f, "snapshot: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<runtime::Error> for Error {
    fn from(err: runtime::Error) -> Error {
        Error::Runtime(err)
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Jvm(err)
    }
}

impl From<snapshot::Error> for Error {
    fn from(err: snapshot::Error) -> Error {
        Error::Snapshot(err)
    }
}

/// Ways a call can complete other than by returning
#[derive(Debug)]
pub enum Abrupt {
    /// Exception thrown by the code (can be caught)
    Throw(ObjRef),

    /// Machine failure (can't be caught)
    Error(Error),
}

impl From<Error> for Abrupt {
    fn from(err: Error) -> Abrupt {
        Abrupt::Error(err)
    }
}

impl From<runtime::Error> for Abrupt {
    fn from(err: runtime::Error) -> Abrupt {
        Abrupt::Error(Error::Runtime(err))
    }
}

impl From<jvm::Error> for Abrupt {
    fn from(err: jvm::Error) -> Abrupt {
        Abrupt::Error(Error::Jvm(err))
    }
}
