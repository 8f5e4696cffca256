//! The media cycle engine: one task owning the current item, the timer and
//! the sink, fed by a single command queue.

mod state;

pub use state::EngineRunState;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, LoadError};
use crate::events::{Direction, EngineCommand, Gesture, PlaybackEvent};
use crate::loader::MediaLoader;
use crate::media::{CurrentMedia, LoadedContent, MediaReference, PlaybackSubstate};
use crate::playlist::PlaylistStore;
use crate::scheduler::{Clock, Scheduler, compute_catch_up_delay};
use crate::sink::{PlaybackReporter, PlaybackSink};
use state::{interval_duration, resolve_index, step};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub target_width: u32,
    pub target_height: u32,
    /// When false, swipe gestures are ignored.
    pub swipe_to_change: bool,
    pub command_queue_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            target_width: 1920,
            target_height: 1080,
            swipe_to_change: true,
            command_queue_capacity: 32,
        }
    }
}

/// Point-in-time view of the engine, answered from inside the engine task.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub run_state: EngineRunState,
    pub current_index: Option<usize>,
    pub current: Option<MediaReference>,
    pub substate: Option<PlaybackSubstate>,
    pub transition_pending: bool,
    pub next_tick_in: Option<Duration>,
}

pub type Listener = Arc<dyn Fn(Option<&Arc<CurrentMedia>>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Default)]
struct Listeners {
    entries: Arc<Mutex<Vec<(ListenerId, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    fn notify(&self, current: Option<&Arc<CurrentMedia>>) {
        // callbacks run without the registry lock held
        let snapshot: Vec<Listener> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(current);
        }
    }
}

/// Runs listener callbacks off the engine task, in commit order, so a slow
/// listener never delays ticks or commands.
async fn dispatch_announcements(
    mut announcements: UnboundedReceiver<Option<Arc<CurrentMedia>>>,
    listeners: Listeners,
) {
    while let Some(current) = announcements.recv().await {
        listeners.notify(current.as_ref());
    }
}

/// Cloneable front door to a running [`MediaCycleEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    listeners: Listeners,
}

impl EngineHandle {
    async fn send(&self, cmd: EngineCommand) -> Result<(), Error> {
        self.commands.send(cmd).await.map_err(|_| Error::EngineClosed)
    }

    pub async fn start(&self) -> Result<(), Error> {
        self.send(EngineCommand::Start).await
    }

    pub async fn pause(&self) -> Result<(), Error> {
        self.send(EngineCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), Error> {
        self.send(EngineCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.send(EngineCommand::Stop).await
    }

    pub async fn advance(&self, direction: Direction, forced: bool) -> Result<(), Error> {
        self.send(EngineCommand::Advance { direction, forced }).await
    }

    pub async fn on_video_prepared(&self) -> Result<(), Error> {
        self.playback(PlaybackEvent::Prepared).await
    }

    pub async fn on_video_completed(&self) -> Result<(), Error> {
        self.playback(PlaybackEvent::Completed).await
    }

    pub async fn on_video_error(&self, cause: impl Into<String>) -> Result<(), Error> {
        self.playback(PlaybackEvent::Error(cause.into())).await
    }

    async fn playback(&self, event: PlaybackEvent) -> Result<(), Error> {
        self.send(EngineCommand::Playback {
            generation: None,
            event,
        })
        .await
    }

    pub async fn on_user_swipe_forward(&self) -> Result<(), Error> {
        self.send(EngineCommand::Gesture(Gesture::SwipeForward)).await
    }

    pub async fn on_user_swipe_backward(&self) -> Result<(), Error> {
        self.send(EngineCommand::Gesture(Gesture::SwipeBackward)).await
    }

    pub async fn on_user_double_tap(&self) -> Result<(), Error> {
        self.send(EngineCommand::Gesture(Gesture::DoubleTap)).await
    }

    pub async fn status(&self) -> Result<EngineStatus, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Status(tx)).await?;
        rx.await.map_err(|_| Error::EngineClosed)
    }

    /// Called once per committed transition, in commit order; `None` means
    /// nothing to display. Callbacks run on a dispatcher task, not the engine
    /// task, so they observe a transition shortly after it commits; a callback
    /// that blocks delays later notifications but not the engine.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&Arc<CurrentMedia>>) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// First load after start: show what is due now.
    Initial,
    /// Timer tick.
    Natural,
    /// User navigation, video completion or video error.
    Forced,
}

/// One navigation request, possibly spanning several load attempts.
#[derive(Debug, Clone)]
struct Request {
    generation: u64,
    index: usize,
    direction: Direction,
    attempts: usize,
    /// Stamp the commit as an advance (last-advance = now).
    advanced: bool,
    /// Timer to arm if an image commits.
    next_delay: Duration,
}

struct InFlight {
    request: Request,
    reference: MediaReference,
}

struct LoadOutcome {
    generation: u64,
    reference: MediaReference,
    result: Result<LoadedContent, LoadError>,
}

/// State machine over run state and video substate.
///
/// Owns the sink, so at most one playback resource is ever live.
pub struct MediaCycleEngine {
    store: Arc<dyn PlaylistStore>,
    loader: Arc<dyn MediaLoader>,
    sink: Box<dyn PlaybackSink>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
    listeners: Listeners,
    announce_tx: UnboundedSender<Option<Arc<CurrentMedia>>>,
    announce_rx: Option<UnboundedReceiver<Option<Arc<CurrentMedia>>>>,
    commands: Receiver<EngineCommand>,
    playback_tx: UnboundedSender<(u64, PlaybackEvent)>,
    playback_rx: UnboundedReceiver<(u64, PlaybackEvent)>,
    scheduler: Scheduler,
    loads: JoinSet<LoadOutcome>,
    run_state: EngineRunState,
    current: Option<Arc<CurrentMedia>>,
    current_generation: u64,
    substate: Option<PlaybackSubstate>,
    pending: Option<InFlight>,
    generation: u64,
    blank_announced: bool,
    /// Set by resume: the next natural tick is a single step.
    interval_restarted: bool,
}

impl MediaCycleEngine {
    pub fn new(
        store: Arc<dyn PlaylistStore>,
        loader: Arc<dyn MediaLoader>,
        sink: Box<dyn PlaybackSink>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(options.command_queue_capacity.max(1));
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (announce_tx, announce_rx) = mpsc::unbounded_channel();
        let listeners = Listeners::default();
        let handle = EngineHandle {
            commands: tx,
            listeners: listeners.clone(),
        };
        let engine = Self {
            store,
            loader,
            sink,
            clock,
            options,
            listeners,
            announce_tx,
            announce_rx: Some(announce_rx),
            commands: rx,
            playback_tx,
            playback_rx,
            scheduler: Scheduler::new(),
            loads: JoinSet::new(),
            run_state: EngineRunState::Stopped,
            current: None,
            current_generation: 0,
            substate: None,
            pending: None,
            generation: 0,
            blank_announced: false,
            interval_restarted: false,
        };
        (engine, handle)
    }

    /// Process commands, timer ticks, load results and playback reports until
    /// cancelled.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("media engine ready");
        if let Some(announcements) = self.announce_rx.take() {
            tokio::spawn(dispatch_announcements(announcements, self.listeners.clone()));
        }
        loop {
            select! {
                _ = cancel.cancelled() => break,

                Some(cmd) = self.commands.recv() => self.handle_command(cmd),

                Some((generation, event)) = self.playback_rx.recv() => {
                    self.on_playback(Some(generation), event);
                }

                Some(joined) = self.loads.join_next(), if !self.loads.is_empty() => {
                    match joined {
                        Ok(outcome) => self.on_load_finished(outcome),
                        Err(err) => warn!("load task failed: {err}"),
                    }
                }

                _ = self.scheduler.fired() => self.on_tick(),
            }
        }
        info!("cancel received; stopping media engine");
        self.stop();
        Ok(())
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => self.activate(),
            EngineCommand::Resume => self.resume(),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Advance { direction, forced } => self.advance(direction, forced),
            EngineCommand::Gesture(gesture) => self.on_gesture(gesture),
            EngineCommand::Playback { generation, event } => self.on_playback(generation, event),
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            run_state: self.run_state,
            current_index: self.current.as_ref().map(|c| c.index),
            current: self.current.as_ref().map(|c| c.reference.clone()),
            substate: self.substate,
            transition_pending: self.pending.is_some(),
            next_tick_in: self.scheduler.remaining(),
        }
    }

    fn current_is_video(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.reference.is_video())
    }

    fn activate(&mut self) {
        if self.run_state == EngineRunState::Running {
            debug!("engine already running");
            return;
        }
        info!(from = ?self.run_state, "engine running");
        self.run_state = EngineRunState::Running;

        if self.pending.is_some() {
            // the commit arms the timer or starts playback
            return;
        }
        if self.current.is_none() {
            self.request_transition(Direction::Next, Trigger::Initial);
        } else if self.current_is_video() {
            if self.substate == Some(PlaybackSubstate::Paused) {
                self.sink.start_video();
                self.substate = Some(PlaybackSubstate::Playing);
            }
        } else {
            self.arm_for_image();
        }
    }

    /// Leave `Paused` without catching up: an image gets a fresh interval and
    /// the last-advance timestamp is left alone.
    fn resume(&mut self) {
        match self.run_state {
            EngineRunState::Running => {
                debug!("engine already running");
                return;
            }
            EngineRunState::Stopped => {
                self.activate();
                return;
            }
            EngineRunState::Paused => {}
        }
        info!("engine resumed");
        self.run_state = EngineRunState::Running;

        if self.pending.is_some() {
            return;
        }
        if self.current_is_video() {
            if self.substate == Some(PlaybackSubstate::Paused) {
                self.sink.start_video();
                self.substate = Some(PlaybackSubstate::Playing);
            }
        } else {
            // image, or nothing showing yet: retry on the next interval
            self.interval_restarted = true;
            let interval = interval_duration(self.store.interval_seconds());
            self.scheduler.schedule_after(interval);
        }
    }

    fn arm_for_image(&mut self) {
        let interval = self.store.interval_seconds();
        let Some(last) = self.store.last_advance_timestamp() else {
            self.scheduler.schedule_after(interval_duration(interval));
            return;
        };
        let catch_up = compute_catch_up_delay(last, interval, self.clock.now());
        if catch_up.steps_to_skip > 0 {
            debug!(steps = catch_up.steps_to_skip, "behind schedule; catching up now");
            self.request_transition(Direction::Next, Trigger::Natural);
        } else {
            self.scheduler.schedule_after(catch_up.delay);
        }
    }

    fn pause(&mut self) {
        if self.run_state != EngineRunState::Running {
            debug!(state = ?self.run_state, "pause ignored");
            return;
        }
        info!("engine paused");
        self.run_state = EngineRunState::Paused;
        self.scheduler.cancel_pending();
        if self.substate == Some(PlaybackSubstate::Playing) {
            self.sink.pause_video();
            self.substate = Some(PlaybackSubstate::Paused);
        }
    }

    fn stop(&mut self) {
        self.scheduler.cancel_pending();
        self.interval_restarted = false;
        self.generation += 1;
        if let Some(stale) = self.pending.take() {
            debug!(uri = %stale.reference, "dropping in-flight load on stop");
        }
        self.release_current_video();
        self.substate = None;
        self.run_state = EngineRunState::Stopped;
        if self.current.take().is_some() {
            info!("engine stopped");
            self.sink.clear();
            self.announce(None);
            self.blank_announced = true;
        }
    }

    fn advance(&mut self, direction: Direction, forced: bool) {
        match self.run_state {
            EngineRunState::Stopped => {
                debug!(?direction, "advance ignored while stopped");
                return;
            }
            EngineRunState::Paused if !forced => {
                debug!("natural advance ignored while paused");
                return;
            }
            _ => {}
        }
        if !forced && self.pending.is_some() {
            debug!("natural advance coalesced into in-flight transition");
            return;
        }
        let trigger = if forced {
            Trigger::Forced
        } else {
            Trigger::Natural
        };
        self.request_transition(direction, trigger);
    }

    fn on_tick(&mut self) {
        if self.run_state != EngineRunState::Running || self.pending.is_some() {
            return;
        }
        debug!("interval elapsed");
        if self.current_is_video() {
            // videos advance on completion only
            return;
        }
        self.request_transition(Direction::Next, Trigger::Natural);
    }

    fn on_gesture(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::SwipeForward | Gesture::SwipeBackward if !self.options.swipe_to_change => {
                debug!(?gesture, "swipe-to-change disabled; ignoring");
            }
            Gesture::SwipeForward => self.advance(Direction::Next, true),
            Gesture::SwipeBackward => self.advance(Direction::Previous, true),
            Gesture::DoubleTap => match self.substate {
                Some(PlaybackSubstate::Playing) => {
                    self.sink.pause_video();
                    self.substate = Some(PlaybackSubstate::Paused);
                }
                Some(PlaybackSubstate::Paused) => {
                    self.sink.start_video();
                    self.substate = Some(PlaybackSubstate::Playing);
                }
                other => debug!(substate = ?other, "double tap ignored"),
            },
        }
    }

    fn on_playback(&mut self, generation: Option<u64>, event: PlaybackEvent) {
        if !self.current_is_video() {
            debug!(?event, "playback report without a current video");
            return;
        }
        if generation.is_some_and(|g| g != self.current_generation) {
            debug!(?event, ?generation, "stale playback report");
            return;
        }
        match event {
            PlaybackEvent::Prepared => {
                if self.substate != Some(PlaybackSubstate::Preparing) {
                    return;
                }
                if self.run_state == EngineRunState::Running {
                    self.sink.start_video();
                    self.substate = Some(PlaybackSubstate::Playing);
                } else {
                    self.substate = Some(PlaybackSubstate::Paused);
                }
            }
            PlaybackEvent::Completed | PlaybackEvent::Error(_) => {
                if self.pending.is_some() {
                    debug!(?event, "transition already in flight");
                    return;
                }
                if let PlaybackEvent::Error(cause) = event {
                    self.substate = Some(PlaybackSubstate::Error);
                    let uri = self.current.as_ref().map(|c| c.reference.uri().to_owned());
                    warn!(uri = ?uri, cause = %cause, "video playback failed");
                } else {
                    self.substate = Some(PlaybackSubstate::Completed);
                    debug!("video completed");
                }
                self.request_transition(Direction::Next, Trigger::Forced);
            }
        }
    }

    /// Work out where to go and issue the first load. Supersedes whatever was
    /// in flight and cancels the pending tick.
    fn request_transition(&mut self, direction: Direction, trigger: Trigger) {
        self.scheduler.cancel_pending();
        self.generation += 1;
        let restarted = std::mem::take(&mut self.interval_restarted);
        let in_flight = self.pending.take().map(|stale| {
            debug!(uri = %stale.reference, "superseding in-flight load");
            stale.request.index
        });

        let count = self.store.count();
        if count == 0 {
            self.show_nothing(Error::EmptyCollection);
            return;
        }
        let interval = self.store.interval_seconds();
        let full = interval_duration(interval);
        let now = self.clock.now();
        let catch_up = self
            .store
            .last_advance_timestamp()
            .map(|last| compute_catch_up_delay(last, interval, now));
        let committed = resolve_index(self.store.current_index(), count).unwrap_or_else(|err| {
            debug!("{err}; restarting from the first item");
            0
        });
        // repeated user navigation steps from the item it was heading to
        let current = match in_flight {
            Some(target) if trigger == Trigger::Forced && target < count => target,
            _ => committed,
        };

        let (index, direction, advanced, next_delay) = match trigger {
            Trigger::Forced => (step(current, count, direction, 1), direction, true, full),
            Trigger::Natural if direction == Direction::Next => {
                let (steps, delay) = match catch_up {
                    Some(c) if c.steps_to_skip > 0 && !restarted => (c.steps_to_skip, c.delay),
                    _ => (1, full),
                };
                (step(current, count, direction, steps), direction, true, delay)
            }
            Trigger::Natural => (step(current, count, direction, 1), direction, true, full),
            Trigger::Initial => match catch_up {
                Some(c) if c.steps_to_skip > 0 => (
                    step(current, count, Direction::Next, c.steps_to_skip),
                    Direction::Next,
                    true,
                    c.delay,
                ),
                Some(c) => (current, Direction::Next, false, c.delay),
                None => (current, Direction::Next, true, full),
            },
        };
        debug!(?trigger, from = current, to = index, "transition requested");

        self.issue_load(Request {
            generation: self.generation,
            index,
            direction,
            attempts: 0,
            advanced,
            next_delay,
        });
    }

    /// Start loading `request.index`, skipping unresolvable slots. Gives up
    /// once every item has been tried for this request.
    fn issue_load(&mut self, mut request: Request) {
        let count = self.store.count();
        let ordering = self.store.ordering();
        while request.attempts < count {
            request.attempts += 1;
            let Some(reference) = self.store.reference_at(request.index, ordering) else {
                debug!(index = request.index, "no reference at index");
                request.index = step(request.index, count, request.direction, 1);
                continue;
            };

            let loader = Arc::clone(&self.loader);
            let (width, height) = (self.options.target_width, self.options.target_height);
            let generation = request.generation;
            let target = reference.clone();
            self.loads.spawn_blocking(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    loader.load(&target, width, height)
                }))
                .unwrap_or(Err(LoadError::Panicked));
                LoadOutcome {
                    generation,
                    reference: target,
                    result,
                }
            });
            debug!(index = request.index, uri = %reference, attempt = request.attempts, "loading");
            self.pending = Some(InFlight { request, reference });
            return;
        }
        self.show_nothing(Error::EmptyCollection);
    }

    fn on_load_finished(&mut self, outcome: LoadOutcome) {
        let is_current = self.pending.as_ref().is_some_and(|p| {
            p.request.generation == outcome.generation && p.reference == outcome.reference
        });
        if !is_current {
            // dropping the outcome releases whatever was decoded
            debug!(uri = %outcome.reference, "discarding stale load result");
            return;
        }
        let Some(InFlight { request, reference }) = self.pending.take() else {
            return;
        };
        match outcome.result {
            Ok(content) => self.commit(request, reference, content),
            Err(source) => {
                let err = Error::LoadFailure {
                    uri: reference.uri().to_owned(),
                    source,
                };
                warn!(index = request.index, "{err}");
                let count = self.store.count();
                let index = step(request.index, count, request.direction, 1);
                self.issue_load(Request { index, ..request });
            }
        }
    }

    fn commit(&mut self, request: Request, reference: MediaReference, content: LoadedContent) {
        let now = self.clock.now();
        self.store
            .commit(request.index, request.advanced.then_some(now));

        self.release_current_video();
        let is_video = reference.is_video();
        let media = Arc::new(CurrentMedia {
            index: request.index,
            reference,
            content,
            substate: is_video.then_some(PlaybackSubstate::Preparing),
        });
        info!(
            index = media.index,
            uri = %media.reference,
            kind = ?media.reference.media_type(),
            "media committed"
        );
        self.current = Some(Arc::clone(&media));
        self.current_generation = request.generation;
        self.substate = is_video.then_some(PlaybackSubstate::NotStarted);
        self.blank_announced = false;

        let reporter = PlaybackReporter::new(request.generation, self.playback_tx.clone());
        self.sink.display(&media, reporter);
        if is_video {
            self.substate = Some(PlaybackSubstate::Preparing);
        }

        self.announce(Some(media));

        if !is_video && self.run_state == EngineRunState::Running {
            self.scheduler.schedule_after(request.next_delay);
        }
    }

    fn announce(&self, current: Option<Arc<CurrentMedia>>) {
        if self.announce_tx.send(current).is_err() {
            debug!("listener dispatcher gone");
        }
    }

    fn release_current_video(&mut self) {
        if self.current_is_video() {
            self.sink.stop_video();
        }
    }

    /// Empty collection or nothing loadable: clear the surface and retry on
    /// the next interval.
    fn show_nothing(&mut self, reason: Error) {
        self.pending = None;
        warn!("{reason}");
        self.release_current_video();
        self.substate = None;
        let had_media = self.current.take().is_some();
        if had_media || !self.blank_announced {
            self.sink.clear();
            self.announce(None);
            self.blank_announced = true;
        }
        if self.run_state == EngineRunState::Running {
            let interval = interval_duration(self.store.interval_seconds());
            self.scheduler.schedule_after(interval);
        }
    }
}
