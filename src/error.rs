use thiserror::Error;

/// Errors reported by the codec engine (probe, decode, resize, encode).
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The file is not an image format the codec can read (maps to HTTP 415)
    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    /// Reading dimensions or format from the file failed
    #[error("Failed to probe image: {0}")]
    Probe(String),

    /// Decoding or extracting the source region failed
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Encoding the output tile failed
    #[error("Failed to encode tile: {0}")]
    Encode(String),
}

/// Errors raised by the image store when resolving or registering originals.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Image id contains characters that cannot name a file
    #[error("Invalid image id: {image_id:?}")]
    InvalidImageId { image_id: String },

    /// No original file exists for the id
    #[error("Image not found: {image_id}")]
    NotFound { image_id: String },

    /// More than one original file matches the id
    #[error("Image id {image_id} matches {candidates} original files")]
    Ambiguous { image_id: String, candidates: usize },

    /// The id was already registered in this process
    #[error("Image already registered: {image_id}")]
    AlreadyRegistered { image_id: String },

    /// Probing the original failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors that can occur while serving a tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Malformed tile request (bad id, coordinate syntax, extension)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The image id does not resolve to an original file
    #[error("Image not found: {image_id}")]
    ImageNotFound { image_id: String },

    /// The coordinate lies outside the pyramid; no tile exists there
    #[error("Tile ({x}, {y}) at level {level} is outside the pyramid")]
    OutOfBounds { level: u32, x: u32, y: u32 },

    /// Rendering the tile failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Store failure other than a missing image
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Reading or writing the tile cache failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The decode gate was closed while waiting for a slot
    #[error("Decode gate closed")]
    GateClosed,

    /// The generation task ended without publishing a result
    #[error("Tile generation aborted")]
    Aborted,
}

impl From<StoreError> for TileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { image_id } => TileError::ImageNotFound { image_id },
            StoreError::InvalidImageId { image_id } => TileError::InvalidRequest {
                message: format!("invalid image id {:?}", image_id),
            },
            StoreError::Codec(codec) => TileError::Codec(codec),
            other => TileError::Store(other),
        }
    }
}

impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::Io(err.to_string())
    }
}

/// Errors that can occur while ingesting an uploaded file.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// The request carried no file part
    #[error("No file provided")]
    MissingPayload,

    /// Malformed upload request
    #[error("Invalid upload: {0}")]
    InvalidRequest(String),

    /// The uploaded file could not be probed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Registration failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Moving or writing the file failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err.to_string())
    }
}
