//! Kernel emission for tessera.
//!
//! Turns a bound program into an ordered [`KernelList`]: contractions
//! are flattened, simplified, fused with their downstream elementwise
//! ops, vectorized, and tiled; outputs the aggregation cannot fully
//! cover get prefill kernels; special functions get dedicated kernels.
//!
//! The single entry point is [`generate_program`].

mod error;
mod generate;
mod kernel;
mod rewrite;
mod special;
mod unify;
mod zero;

pub use error::GenerateError;
pub use generate::generate_program;
pub use kernel::{ConstraintInfo, ContractionInfo, IndexInfo, KernelInfo, KernelKind, KernelList};
pub use rewrite::VarRewrites;
pub use special::special_kernel;
pub use zero::{copy_kernel, needs_zero, zero_kernel};
