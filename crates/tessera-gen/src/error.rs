//! Error types for kernel generation.

use tessera_ir::BindError;
use tessera_opt::FlattenError;

/// Errors raised while generating kernels for a program.
///
/// All are fatal for the current program; no partial kernel list is
/// produced. Callers retry with a corrected program or report upward.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// A referenced tensor has no shape binding.
    #[error("no shape bound for tensor `{0}`")]
    MissingShape(String),

    /// A reshape op arrived with no inputs.
    #[error("reshape `{0}` must have at least one input")]
    ReshapeMissingInput(String),

    /// A reshape was applied to a scalar binding.
    #[error("reshape only works on tensors, `{0}` is not one")]
    ReshapeNonTensor(String),

    /// A reshape changed the element count or byte size.
    #[error("invalid reshape: `{from}` and `{to}` differ in size")]
    ReshapeSizeMismatch { from: String, to: String },

    /// A `prng_state` or `prng_value` op without its `prng_step`.
    #[error("`{0}`: prng functions must come in threes")]
    OrphanPrng(String),

    /// A `prng_step` with a value consumer but no state consumer.
    #[error("prng_step `{0}` has a value consumer but no state consumer")]
    PrngMissingState(String),

    /// Shape binding failed.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Contraction lowering failed.
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    /// A should-never-happen invariant was violated.
    #[error("internal: {0}")]
    Internal(String),
}
