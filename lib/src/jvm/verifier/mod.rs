//! Bytecode verification utilities
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _frame_
//! (represented using [`Frame`]) and the set of frames for all possible jump targets in a method
//! is the _stack map table_ (see [`StackMapFrame`]).
//!
//! Knowing the frame at a point in the code makes it possible to verify that the next instruction
//! makes sense (eg. `dadd` only makes sense if the top two elements on the stack are of type
//! `double`). The "types" used in verification (represented using [`VerificationType`]) are
//! slightly augmented to take into account initialization, null and unusable slots.
//!
//! Although verifying straight-line instructions is pretty simple (see
//! [`Frame::verify_instruction`]), things get more complicated when an instruction can be reached
//! from multiple locations (eg. it is the target of jumps or an exception handler). In those
//! cases, the frames from the different source locations need to be unified. [`Analyzer`] runs
//! this as a fix-point algorithm which converges towards the right answer (if there is one).
//! Legacy `jsr`/`ret` subroutines are not supported by the analyzer: they need to be removed first
//! with [`inline_subroutines`].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analyzer;
mod frame;
mod stack_map;
mod subroutines;
mod types;

pub use analyzer::*;
pub use frame::*;
pub use stack_map::*;
pub use subroutines::*;
pub use types::*;
