//! Stackful coroutines for JVM-style methods, by bytecode instrumentation
//!
//! A method that can suspend takes a `coroutines/user/Continuation` parameter and calls
//! `suspend()` on it. The [`instrument`] pass rewrites every such method so that a suspend unwinds
//! the whole call stack while saving each frame into the continuation, and so that running the
//! entry point again restores those frames and resumes right after the suspend.
//!
//!   - [`jvm`] is the class model: names, descriptors, symbolic code, the type hierarchy oracle and
//!     the frame analyzer
//!   - [`instrument`] locates continuation points and synthesizes the save and restore code
//!   - [`runtime`] has the continuation and lock state machines that generated code drives
//!   - [`snapshot`] writes suspended coroutines out and reads them back, across code versions
//!   - [`interp`] is a small interpreter for running instrumented code end to end

pub mod instrument;
pub mod interp;
pub mod jvm;
pub mod runtime;
pub mod snapshot;
pub mod util;
