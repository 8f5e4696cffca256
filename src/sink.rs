//! The output side: whatever renders the current media and plays videos.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::events::PlaybackEvent;
use crate::media::{CurrentMedia, LoadedContent};

/// Routes a sink's video lifecycle reports back into the engine.
///
/// Tagged with the generation of the item it was handed out for, so reports
/// from an item that has since been replaced are ignored.
#[derive(Debug, Clone)]
pub struct PlaybackReporter {
    generation: u64,
    tx: UnboundedSender<(u64, PlaybackEvent)>,
}

impl PlaybackReporter {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<(u64, PlaybackEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn prepared(&self) {
        self.send(PlaybackEvent::Prepared);
    }

    pub fn completed(&self) {
        self.send(PlaybackEvent::Completed);
    }

    pub fn error(&self, cause: impl Into<String>) {
        self.send(PlaybackEvent::Error(cause.into()));
    }

    fn send(&self, event: PlaybackEvent) {
        if self.tx.send((self.generation, event)).is_err() {
            debug!("engine gone; dropping playback report");
        }
    }
}

/// Capability the engine drives. Owned exclusively by the engine task.
///
/// `stop_video` must release every decode/playback resource of the current
/// item; the engine calls it before displaying the next one.
pub trait PlaybackSink: Send {
    fn display(&mut self, media: &CurrentMedia, reporter: PlaybackReporter);
    fn start_video(&mut self);
    fn pause_video(&mut self);
    fn stop_video(&mut self);

    /// Nothing to display.
    fn clear(&mut self) {}
}

struct SimulatedPlayback {
    uri: String,
    reporter: PlaybackReporter,
    remaining: Duration,
    started: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// Sink without a display: logs what would be shown and pretends each video
/// plays for a fixed duration.
pub struct HeadlessSink {
    video_duration: Duration,
    muted: bool,
    playback: Option<SimulatedPlayback>,
}

impl HeadlessSink {
    pub fn new(video_duration: Duration, muted: bool) -> Self {
        Self {
            video_duration,
            muted,
            playback: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.task.is_some())
    }
}

impl PlaybackSink for HeadlessSink {
    fn display(&mut self, media: &CurrentMedia, reporter: PlaybackReporter) {
        self.stop_video();
        match &media.content {
            LoadedContent::Image(img) => {
                info!(
                    index = media.index,
                    uri = %media.reference,
                    width = img.width,
                    height = img.height,
                    "showing image"
                );
            }
            LoadedContent::Video(video) => {
                info!(
                    index = media.index,
                    uri = %media.reference,
                    bytes = video.size_bytes,
                    muted = self.muted,
                    "preparing video"
                );
                self.playback = Some(SimulatedPlayback {
                    uri: media.reference.uri().to_owned(),
                    reporter: reporter.clone(),
                    remaining: self.video_duration,
                    started: None,
                    task: None,
                });
                reporter.prepared();
            }
        }
    }

    fn start_video(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if playback.task.is_some() {
            return;
        }
        debug!(uri = %playback.uri, remaining_ms = playback.remaining.as_millis() as u64, "video playing");
        let reporter = playback.reporter.clone();
        let remaining = playback.remaining;
        playback.started = Some(Instant::now());
        playback.task = Some(tokio::spawn(async move {
            sleep(remaining).await;
            reporter.completed();
        }));
    }

    fn pause_video(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if let Some(task) = playback.task.take() {
            task.abort();
            let played = playback
                .started
                .take()
                .map(|s| s.elapsed())
                .unwrap_or_default();
            playback.remaining = playback.remaining.saturating_sub(played);
            debug!(uri = %playback.uri, remaining_ms = playback.remaining.as_millis() as u64, "video paused");
        }
    }

    fn stop_video(&mut self) {
        if let Some(playback) = self.playback.take() {
            if let Some(task) = playback.task {
                task.abort();
            }
            debug!(uri = %playback.uri, "video released");
        }
    }

    fn clear(&mut self) {
        self.stop_video();
        info!("nothing to display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaReference, MediaType, VideoSource};
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn video() -> CurrentMedia {
        CurrentMedia {
            index: 0,
            reference: MediaReference::new("/m/clip.mp4", MediaType::Video),
            content: LoadedContent::Video(VideoSource {
                path: PathBuf::from("/m/clip.mp4"),
                size_bytes: 1,
            }),
            substate: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_remaining_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = HeadlessSink::new(Duration::from_secs(10), true);
        sink.display(&video(), PlaybackReporter::new(7, tx));
        assert_eq!(rx.recv().await, Some((7, PlaybackEvent::Prepared)));

        sink.start_video();
        tokio::time::advance(Duration::from_secs(4)).await;
        sink.pause_video();
        assert!(!sink.is_playing());

        let early = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(early.is_err(), "paused video must not complete");

        sink.start_video();
        let done = tokio::time::timeout(Duration::from_secs(7), rx.recv())
            .await
            .expect("video should finish its remaining 6s");
        assert_eq!(done, Some((7, PlaybackEvent::Completed)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_playback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = HeadlessSink::new(Duration::from_secs(1), false);
        sink.display(&video(), PlaybackReporter::new(1, tx));
        let _ = rx.recv().await;
        sink.start_video();
        sink.stop_video();
        let res = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(res, Err(_) | Ok(None)));
    }
}
