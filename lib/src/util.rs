mod binary_format;
mod offset_vec;

pub use binary_format::*;
pub use offset_vec::*;
