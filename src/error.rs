use thiserror::Error;

/// Library error type for media-cycle operations.
///
/// None of these reach the caller of a navigation request; the engine logs
/// them and moves on to the next playable item.
#[derive(Debug, Error)]
pub enum Error {
    /// Content for a reference could not be fetched or decoded.
    #[error("failed to load {uri}: {source}")]
    LoadFailure {
        uri: String,
        #[source]
        source: LoadError,
    },

    /// Video preparation or playback failed inside the sink.
    #[error("playback failed for {uri}: {cause}")]
    PlaybackFailure { uri: String, cause: String },

    /// The playlist holds no references, or none of them could be loaded.
    #[error("no playable media in collection")]
    EmptyCollection,

    /// A persisted index pointed past the end of the collection.
    #[error("index {index} out of range for {count} items")]
    InvalidIndex { index: usize, count: usize },

    /// The engine task is gone; its command queue is closed.
    #[error("media engine is not running")]
    EngineClosed,

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Persisted playlist state could not be (de)serialized.
    #[error(transparent)]
    State(#[from] serde_json::Error),
}

/// Why a [`crate::loader::MediaLoader`] could not produce content.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("loader panicked")]
    Panicked,
}
