//! Symbolic method bodies
//!
//! ### Structure
//!
//! A method body is an ordered list of [`Instruction`]s in which labels and line numbers are
//! pseudo-instructions, plus an exception table whose ranges are given by labels. Keeping
//! everything symbolic means rewriting passes can splice glue code anywhere without worrying
//! about jump offsets, and the same representation can be analyzed, executed (see
//! [`crate::interp`]) or printed.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod code;
mod instructions;
mod label;

pub use code::*;
pub use instructions::*;
pub use label::*;
