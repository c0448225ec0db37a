use std::path::PathBuf;

/// Errors produced while rectifying the ground plane and reading labels
#[derive(thiserror::Error, Debug)]
pub enum RectifyError {
    /// Calibration parameter file missing or unreadable
    #[error("could not open file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Calibration parameter file readable but not in the expected format
    #[error("malformed parameter file {path:?}: {reason}")]
    ParamFormat { path: PathBuf, reason: String },

    /// Source image missing or undecodable
    #[error("could not load image {path:?}: {reason}")]
    ImageLoad { path: PathBuf, reason: String },

    /// Corner points collinear/duplicate or transform not invertible
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// All cyclic orderings of the quad were tried without locating the marker
    #[error("orientation not resolved after {attempts} rotations")]
    OrientationNotResolved { attempts: usize },

    /// OCR returned nothing usable for a region
    #[error("no digits recognized")]
    RecognitionEmpty,

    /// Point picking was cancelled, timed out or lost its event source
    #[error("point picking cancelled after {picked} of {required} points")]
    PickCancelled { picked: usize, required: usize },

    /// OCR collaborator failed to run
    #[error("ocr engine failed: {0}")]
    Ocr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RectifyError {
    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateGeometry(reason.into())
    }

    /// Whether the caller can recover by re-acquiring input (points, ordering, text)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DegenerateGeometry(_)
                | Self::OrientationNotResolved { .. }
                | Self::RecognitionEmpty
                | Self::PickCancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RectifyError>;
