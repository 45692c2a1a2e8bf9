//! Error types shared by the geometry core and the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while ingesting, merging, simplifying or writing boundaries.
#[derive(Debug, Error)]
pub enum Error {
    /// Geometry is not areal (Polygon or MultiPolygon), either on input or after a union.
    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    /// A ring violates the ring invariants (too few vertices, zero area, self-intersection).
    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),

    /// The document parsed as JSON but is not a usable FeatureCollection.
    #[error("malformed GeoJSON: {0}")]
    Format(String),

    /// The run was configured in a way the pipeline cannot honour.
    #[error("invalid settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn geometry(message: impl Into<String>) -> Self {
        Error::Geometry(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedGeometry(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
