//! Media references and the payloads that flow from the loader to the sink.

use std::ffi::OsStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];
const VIDEO_EXTS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "3gp", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Classify a file by extension. Unknown extensions are not media.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)?;
        if IMAGE_EXTS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// One entry of the collection: an opaque uri plus its type tag.
///
/// Two references with the same uri are the same entity, whatever their tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaReference {
    uri: String,
    media_type: MediaType,
}

impl MediaReference {
    pub fn new(uri: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            uri: uri.into(),
            media_type,
        }
    }

    /// Build a reference for a file on disk, or `None` if it is not media.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let media_type = MediaType::from_path(path)?;
        Some(Self::new(path.to_string_lossy().into_owned(), media_type))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    /// Local filesystem path for `file://` or bare-path uris.
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.uri.strip_prefix("file://").unwrap_or(&self.uri))
    }
}

impl PartialEq for MediaReference {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for MediaReference {}

impl Hash for MediaReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// RGBA8 pixels ready for upload.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A video the sink can open; decoding is the sink's business.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub enum LoadedContent {
    Image(DecodedImage),
    Video(VideoSource),
}

/// Fine-grained playback status of a video item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSubstate {
    NotStarted,
    Preparing,
    Playing,
    Paused,
    Completed,
    Error,
}

/// Snapshot of what the engine is presenting.
///
/// Replaced wholesale on every transition; `substate` is the value at commit
/// time (live values come from `EngineStatus`).
#[derive(Debug, Clone)]
pub struct CurrentMedia {
    pub index: usize,
    pub reference: MediaReference,
    pub content: LoadedContent,
    pub substate: Option<PlaybackSubstate>,
}
