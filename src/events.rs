use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::media::MediaReference;
use crate::tasks::engine::EngineStatus;

/// Collection edits coming from the library watcher.
#[derive(Debug)]
pub enum InventoryEvent {
    MediaAdded(MediaReference),
    MediaRemoved(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Video lifecycle reports from a playback sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Prepared,
    Completed,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    SwipeForward,
    SwipeBackward,
    DoubleTap,
}

/// Everything that may mutate engine state; processed one at a time.
#[derive(Debug)]
pub enum EngineCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Advance { direction: Direction, forced: bool },
    Gesture(Gesture),
    /// `generation` is `None` for reports that target whatever is current.
    Playback {
        generation: Option<u64>,
        event: PlaybackEvent,
    },
    Status(oneshot::Sender<EngineStatus>),
}
