//! Snapshot errors

use lad_core::LadError;

/// Errors that can occur when writing or reading a snapshot
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// File is too small to be a valid snapshot
    #[error("Snapshot file too small: {size} bytes")]
    FileTooSmall {
        /// Actual file size
        size: usize,
    },
    /// Header bytes could not be parsed
    #[error("Invalid snapshot header")]
    InvalidHeader,
    /// Invalid magic bytes
    #[error("Invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes
        expected: [u8; 4],
        /// Actual magic bytes
        actual: [u8; 4],
    },
    /// Unsupported format version
    #[error("Unsupported snapshot version {version}, max supported is {max_supported}")]
    UnsupportedVersion {
        /// Version found in the file
        version: u32,
        /// Maximum version this build reads
        max_supported: u32,
    },
    /// Body length in the header disagrees with the file
    #[error("Body length mismatch: header declares {declared} bytes, file holds {actual}")]
    LengthMismatch {
        /// Length declared in the header
        declared: u64,
        /// Length present in the file
        actual: u64,
    },
    /// CRC mismatch
    #[error("CRC mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    CrcMismatch {
        /// Stored CRC
        stored: u32,
        /// Computed CRC
        computed: u32,
    },
    /// Body could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),
    /// Body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnapshotError {
    /// True when the file exists but its contents cannot be trusted
    pub fn is_corruption(&self) -> bool {
        !matches!(self, SnapshotError::Io(_) | SnapshotError::Encode(_))
    }
}

impl From<SnapshotError> for LadError {
    fn from(e: SnapshotError) -> Self {
        LadError::Snapshot(e.to_string())
    }
}
