use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation pipeline.
///
/// Each variant carries the context of the stage that failed so the HTTP layer
/// can decide between a client error and a server error without parsing
/// messages. Only `Validation` is reported back to callers verbatim.
#[derive(Error, Debug)]
pub enum MedSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Image fetch error: request to {url} failed")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{field}: {reason}")]
    Validation { field: String, reason: String },
}

impl MedSegError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn model(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn image(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ImageProcessing {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Whether the error was caused by the caller's input rather than by the service.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, MedSegError>;

/// Some helpers (config parsing, CLI plumbing) speak anyhow; fold those into
/// configuration errors at the boundary.
impl From<anyhow::Error> for MedSegError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Fallback for I/O errors raised without path context. Callers that know the
/// path should build `FileSystem` themselves.
impl From<std::io::Error> for MedSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for MedSegError {
    fn from(err: image::ImageError) -> Self {
        Self::image("image processing", err)
    }
}

impl From<ort::Error> for MedSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors only show up while reshaping tensors around inference, so they
/// are reported as model errors.
impl From<ndarray::ShapeError> for MedSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_client_error() {
        let err = MedSegError::validation("image", "Image must be 2D");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "image: Image must be 2D");
    }

    #[test]
    fn test_other_errors_are_not_validation() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(!MedSegError::from(io).is_validation());

        let err = MedSegError::model("inference", "boom");
        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "Model error: inference failed");
    }
}
