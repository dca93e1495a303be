// SPDX-License-Identifier: MIT
//! Error taxonomy for the container codec

use crate::compression::CompressionError;

/// Errors raised while building, encoding or decoding a container
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The in-memory model (or the header read back from disk) is inconsistent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The on-disk structure is corrupt, truncated or unrecognized.
    #[error("Format error: {0}")]
    Format(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ContainerError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// True for errors the caller can fix by correcting the model
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True for corrupt or truncated input
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
