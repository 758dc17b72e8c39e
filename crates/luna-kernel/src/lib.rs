//! Luna script kernel.
//!
//! Cells are written in a small Rust-flavoured scripting language: the source
//! is parsed with `syn` as the body of a block and evaluated by a tree-walking
//! interpreter. A [`Kernel`] keeps its global namespace across runs, captures
//! printed output, and buffers figures for PNG rendering.
//!
//! ```
//! use luna_kernel::Kernel;
//!
//! let mut kernel = Kernel::new();
//! kernel.run("let xs = vec![1, 2, 3];");
//! let out = kernel.run("println!(\"sum = {}\", xs.sum());");
//! assert_eq!(out.stdout, "sum = 6\n");
//! ```

mod abort;
mod builtins;
mod error;
mod format;
mod interp;
mod kernel;
pub mod plot;
mod value;

pub use abort::AbortHandle;
pub use error::{ErrorKind, KernelError, KernelResult, Location};
pub use kernel::{Kernel, RunOutput};
pub use plot::{PlotBackend, PlotStyle, init_backend};
pub use value::{Function, Value};
