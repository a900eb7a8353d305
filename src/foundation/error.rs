use crate::scene::NodeId;

/// Result alias used throughout the crate.
pub type StrataResult<T> = Result<T, StrataError>;

/// Errors produced while rendering a document.
///
/// Only [`StrataError::AllocationFailure`], [`StrataError::InvalidDimensions`] and
/// [`StrataError::CyclicReference`] are recoverable: the site that requested the content treats it
/// as transparent and keeps rendering. Every other kind aborts the current render call.
#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    /// The backend could not create a surface (empty bounds, size or memory limit).
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// A subtree surface was requested with a non-positive size.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: i64,
        /// Requested height.
        height: i64,
    },

    /// A reference chain loops back onto a node that is already being resolved.
    #[error("cyclic reference through node {0}")]
    CyclicReference(NodeId),

    /// A layer pop did not match its push.
    #[error("mismatched layer pairing: {0}")]
    MismatchedLayerPairing(String),

    /// The backend failed while compositing or running a pixel pass.
    #[error("backend composite failure: {0}")]
    BackendCompositeFailure(String),

    /// The render context was used before a root target was bound.
    #[error("render context is unbound: {0}")]
    Unbound(String),

    /// Malformed document or options.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration decoding failed.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped foreign error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Build an [`StrataError::AllocationFailure`].
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::AllocationFailure(msg.into())
    }

    /// Build an [`StrataError::InvalidDimensions`].
    pub fn invalid_dimensions(width: impl Into<i64>, height: impl Into<i64>) -> Self {
        Self::InvalidDimensions {
            width: width.into(),
            height: height.into(),
        }
    }

    /// Build an [`StrataError::MismatchedLayerPairing`].
    pub fn mismatched_layers(msg: impl Into<String>) -> Self {
        Self::MismatchedLayerPairing(msg.into())
    }

    /// Build an [`StrataError::BackendCompositeFailure`].
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendCompositeFailure(msg.into())
    }

    /// Build an [`StrataError::Unbound`].
    pub fn unbound(msg: impl Into<String>) -> Self {
        Self::Unbound(msg.into())
    }

    /// Build an [`StrataError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build an [`StrataError::Serde`].
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Whether the requesting call site may treat the content as empty and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure(_) | Self::InvalidDimensions { .. } | Self::CyclicReference(_)
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
