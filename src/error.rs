use thiserror::Error;

/// Errors surfaced by the tile cache.
///
/// A cache miss is not an error; lookups return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A parameter was out of range or inconsistent.
    ///
    /// Raised before any state is touched, so the cache is unchanged.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation belongs to the count-based, comparator-driven cache
    /// policy and does not exist in the weight-based design.
    #[error("Unsupported operation: {0} is not available on a weight-bounded tile cache")]
    UnsupportedOperation(&'static str),
}

impl CacheError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CacheError::InvalidArgument(message.into())
    }
}
