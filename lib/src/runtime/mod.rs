//! Runtime support that instrumented code calls into
//!
//! Instrumented methods only ever talk to four runtime classes, all in `coroutines/user/`:
//!
//!   - `Continuation`, the handle threaded through every suspendable method, which holds the
//!     execution mode and the chain of saved method states (see [`Continuation`])
//!   - `MethodState`, one saved frame (method identity, continuation point, lock state, data)
//!   - `Data`, five typed arrays holding either locals or operand stack values
//!   - `LockState`, the monitors a method held when it was saved (see [`LockState`])
//!
//! [`RuntimeMembers`] has method references for everything generated code calls. The state
//! machines here are generic over the representation of a saved state, so the same logic backs
//! the reference interpreter and can be tested on its own.

mod continuation;
mod lock_state;
mod members;

pub use continuation::*;
pub use lock_state::*;
pub use members::*;

pub(crate) use members::method;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `loadNextMethodState` was called with no more saved states
    NoStateToLoad { next_load: usize, saved: usize },

    /// A cycle ended while states were still being loaded
    IncompleteRestore { loaded: usize, saved: usize },

    /// Mode integer outside of the known modes
    InvalidMode(i32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoStateToLoad { next_load, saved } => write!(
                f,
                "no method state to load (next is {} of {})",
                next_load, saved
            ),
            Error::IncompleteRestore { loaded, saved } => write!(
                f,
                "execution finished while restoring ({} of {} states loaded)",
                loaded, saved
            ),
            Error::InvalidMode(mode) => write!(f, "invalid continuation mode {}", mode),
        }
    }
}

impl std::error::Error for Error {}
