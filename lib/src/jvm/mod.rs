//! Model, analyze and query JVM classes
//!
//! ### Example
//!
//! Consider the following simple Java method:
//!
//! ```java,ignore,no_run
//! static int twice(int x) {
//!     return x + x;
//! }
//! ```
//!
//! Building the method and computing its frames can be done as follows:
//!
//! ```
//! use coroutines::jvm::class_graph::JavaLibraryHierarchy;
//! use coroutines::jvm::code::{Code, Instruction::*};
//! use coroutines::jvm::model::Method;
//! use coroutines::jvm::verifier::{Analyzer, VerificationType};
//! use coroutines::jvm::*;
//!
//! # fn analyze() -> Result<(), Error> {
//! let code = Code::new(vec![ILoad(0), ILoad(0), IAdd, IReturn], vec![]);
//! let method = Method::new(
//!     UnqualifiedName::from_str("twice").unwrap(),
//!     MethodDescriptor::parse("(I)I").unwrap(),
//!     MethodAccessFlags::STATIC,
//!     Some(code),
//! );
//!
//! let hierarchy = JavaLibraryHierarchy::new();
//! let this_class = BinaryName::from_str("me/Twice").unwrap();
//! let analysis = Analyzer::new(&hierarchy).analyze(&this_class, &method)?;
//!
//! // Before the addition, there are two integers on the stack
//! let frame = analysis.frames[2].as_ref().unwrap();
//! assert_eq!(frame.stack.len(), 2);
//! assert_eq!(frame.locals, vec![VerificationType::Integer]);
//! assert_eq!(analysis.max_stack, 2);
//! # Ok(())
//! # }
//! # analyze().unwrap();
//! ```

mod access_flags;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
pub mod model;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
