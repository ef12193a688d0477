use thiserror::Error;

/// Errors reported by the capture, sample, and presentation layers.
///
/// Foreign errors are carried as strings so the enum stays cheap to clone
/// and to ship across task boundaries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpectoError {
    /// GPU interop is unavailable or incompatible with the capture session.
    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    /// The requested output encoding cannot be produced by the source.
    #[error("encoding negotiation failed: {0}")]
    EncodingNegotiation(String),

    /// The upstream device or session reported a failure.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The reader was closed; the operation (including one already
    /// pending) cannot complete.
    #[error("capture reader is closed")]
    ReaderClosed,

    /// A frame request is already in flight on this reader.
    #[error("a frame request is already in flight")]
    ConcurrentRequest,

    /// The sample was released (or its pool slot recycled); no further
    /// reads or binds are possible.
    #[error("sample is no longer valid")]
    SampleInvalid,

    /// A sample was offered to a target of different fixed dimensions.
    #[error(
        "dimension mismatch: sample is {sample_width}x{sample_height}, \
         target is {target_width}x{target_height}"
    )]
    DimensionMismatch {
        sample_width: u32,
        sample_height: u32,
        target_width: u32,
        target_height: u32,
    },

    /// Still-image export failed while encoding or writing.
    #[error("image encode failed: {0}")]
    Encode(String),

    /// The presentation surface failed or went away mid-present.
    #[error("presentation failed: {0}")]
    Present(String),

    /// File-system failure outside the encoder.
    #[error("io error: {0}")]
    Io(String),

    /// The operation is not available for this target kind or build.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for SpectoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<image::ImageError> for SpectoError {
    fn from(e: image::ImageError) -> Self {
        Self::Encode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SpectoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = SpectoError::DimensionMismatch {
            sample_width: 640,
            sample_height: 480,
            target_width: 320,
            target_height: 240,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch: sample is 640x480, target is 320x240"
        );
    }

    #[test]
    fn test_terminal_errors_have_fixed_messages() {
        assert_eq!(SpectoError::ReaderClosed.to_string(), "capture reader is closed");
        assert_eq!(
            SpectoError::SampleInvalid.to_string(),
            "sample is no longer valid"
        );
        assert_eq!(
            SpectoError::ConcurrentRequest.to_string(),
            "a frame request is already in flight"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: SpectoError = io.into();
        assert_eq!(err, SpectoError::Io("no such file".to_string()));
    }
}
