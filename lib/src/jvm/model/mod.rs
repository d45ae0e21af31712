//! Semantic representations of classes
//!
//! This is the representation every pass works on. It keeps all of the semantic information
//! around and queryable, without any of the constant pool indirection of class files.
//!
//!   - __Class__ is represented using [`Class`]
//!   - __Method__ is represented using [`Method`]
//!   - __Field__ is represented using [`Field`]
//!   - __Class attributes__ are represented using [`Attribute`]

mod attribute;
mod class;
mod field;
mod method;

pub use attribute::*;
pub use class::*;
pub use field::*;
pub use method::*;
