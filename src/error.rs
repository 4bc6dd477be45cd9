//! Error types for the tracer.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Rejected scene configuration. Raised at scene setup, before any device allocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sphere radius range is inverted: min {min} > max {max}")]
    InvertedRadiusRange { min: f32, max: f32 },

    #[error("sphere radius must be finite and non-negative, got {0}")]
    InvalidRadius(f32),

    #[error("placement radius must be positive, got {0}")]
    NonPositivePlacementRadius(f32),
}

/// Main error type for tracer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Scene configuration was rejected
    #[error("invalid scene configuration: {0}")]
    Config(#[from] ConfigError),

    /// Device memory could not be allocated
    #[error("failed to allocate {size} bytes for `{label}`: {reason}")]
    Allocation {
        label: String,
        size: u64,
        reason: String,
    },

    /// Payload length does not match count * stride
    #[error("`{label}` payload of {bytes} bytes is not a multiple of stride {stride}")]
    Layout {
        label: String,
        stride: usize,
        bytes: usize,
    },

    /// The compute kernel could not be dispatched
    #[error("kernel dispatch failed: {0}")]
    Dispatch(String),

    /// No adapter, device or surface could be created
    #[error("graphics device unavailable: {0}")]
    Device(String),

    /// Presentation surface is unavailable
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    /// Environment texture could not be decoded
    #[error("failed to decode texture: {0}")]
    Texture(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error should end the process rather than the current frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Surface(wgpu::SurfaceError::OutOfMemory))
    }
}
