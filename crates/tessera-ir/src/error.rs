//! Error types for program binding.

/// Errors raised while deriving variable bindings for a program.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// A referenced tensor has no shape binding.
    #[error("no shape bound for tensor `{0}`")]
    MissingShape(String),

    /// An operation required a tensor but found a scalar binding.
    #[error("`{0}` is not a tensor")]
    NotATensor(String),

    /// A reshape's trailing inputs were not integer constants.
    #[error("reshape of `{0}` requires integer dimension sizes")]
    BadReshapeDims(String),

    /// A contraction had fewer than two tensor specs.
    #[error("contraction for `{output}` has {count} spec(s); an output and at least one input are required")]
    TooFewSpecs { output: String, count: usize },

    /// An index range could not be derived from any operand dimension.
    #[error("cannot derive a range for index `{idx}` while binding `{output}`")]
    UnboundedIndex { idx: String, output: String },

    /// Tensor inputs of an elementwise op had incompatible dimensions.
    #[error("inputs of `{0}` cannot be broadcast together")]
    BroadcastMismatch(String),
}
