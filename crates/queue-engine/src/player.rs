//! Player facade.
//!
//! Opens a [`PlaybackEngine`] and hands it to a worker thread that owns it exclusively.
//! User commands and device notifications are both delivered to that worker over one
//! channel, so they are applied strictly in order.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use playback_types::{PlaybackState, PlayerEvent, PositionSample};

use crate::config::EngineConfig;
use crate::device::{DeviceBuilder, DeviceClock, DeviceEvent, DeviceEventHandler, OutputDevice};
use crate::engine::{EngineStatus, PlaybackEngine};
use crate::error::{OpenError, PlayerError};
use crate::observers::Observers;
use crate::position::PositionTracker;
use crate::source::{FilePacketSource, PacketSource};
use crate::track::Track;

type Reply = Sender<Result<(), PlayerError>>;

/// Commands accepted by the engine worker thread.
enum EngineCommand {
    Play(Reply),
    Pause(Reply),
    Toggle(Reply),
    Stop(Reply),
    Device(DeviceEvent),
    Shutdown,
}

/// Cloneable control handle, usable from any thread (e.g. a signal handler).
#[derive(Clone)]
pub struct PlayerHandle {
    commands: Sender<EngineCommand>,
}

impl PlayerHandle {
    fn request(&self, command: fn(Reply) -> EngineCommand) -> Result<(), PlayerError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(command(reply_tx))
            .map_err(|_| PlayerError::Closed)?;
        reply_rx.recv().map_err(|_| PlayerError::Closed)?
    }

    pub fn play(&self) -> Result<(), PlayerError> {
        self.request(EngineCommand::Play)
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.request(EngineCommand::Pause)
    }

    /// Play when not audible, pause otherwise.
    pub fn toggle(&self) -> Result<(), PlayerError> {
        self.request(EngineCommand::Toggle)
    }

    /// Stop playback. Idempotent; succeeds after the player is gone.
    pub fn stop(&self) -> Result<(), PlayerError> {
        match self.request(EngineCommand::Stop) {
            Err(PlayerError::Closed) => Ok(()),
            other => other,
        }
    }
}

pub struct Player {
    handle: PlayerHandle,
    track: Track,
    status: Arc<EngineStatus>,
    clock: Arc<dyn DeviceClock>,
    events: Observers<PlayerEvent>,
    positions: Observers<PositionSample>,
    tracker: Option<PositionTracker>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// Open `source` on a device created by `builder` and prime the buffer pool.
    ///
    /// Open failures are returned here; playback does not start until [`Player::play`].
    pub fn open<S, B>(source: S, builder: B, config: &EngineConfig) -> Result<Self, OpenError>
    where
        S: PacketSource + 'static,
        B: DeviceBuilder,
    {
        let config = config.clone().sanitized();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();

        let device_tx = commands_tx.clone();
        let handler: DeviceEventHandler = Arc::new(move |event| {
            let _ = device_tx.send(EngineCommand::Device(event));
        });

        let engine = PlaybackEngine::open(source, builder, handler, &config)?;
        let track = engine.track().clone();
        let status = engine.status();
        let clock = engine.clock();
        let events = engine.events();

        let positions = Observers::new();
        let tracker = PositionTracker::spawn(
            clock.clone(),
            track.sample_rate(),
            config.position_interval,
            config.position_threshold,
            positions.clone(),
        );
        let worker = thread::spawn(move || run_engine(engine, commands_rx));

        Ok(Self {
            handle: PlayerHandle {
                commands: commands_tx,
            },
            track,
            status,
            clock,
            events,
            positions,
            tracker: Some(tracker),
            worker: Some(worker),
        })
    }

    /// Open a local audio file.
    pub fn open_file<B>(
        path: impl AsRef<Path>,
        builder: B,
        config: &EngineConfig,
    ) -> Result<Self, OpenError>
    where
        B: DeviceBuilder,
    {
        let source = FilePacketSource::open(path, config).map_err(OpenError::Source)?;
        Self::open(source, builder, config)
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn play(&self) -> Result<(), PlayerError> {
        self.handle.play()
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.handle.pause()
    }

    pub fn toggle(&self) -> Result<(), PlayerError> {
        self.handle.toggle()
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.handle.stop()
    }

    pub fn is_playing(&self) -> bool {
        self.status.state().is_audible()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.state()
    }

    /// Packets submitted to the device so far.
    pub fn cursor(&self) -> u64 {
        self.status.cursor()
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn duration(&self) -> Option<Duration> {
        self.track.duration()
    }

    /// Current device position, uncoalesced. `None` before the device starts.
    pub fn position(&self) -> Option<PositionSample> {
        self.clock
            .current_time()
            .map(|t| PositionSample::from_sample_time(t.sample_time, self.track.sample_rate()))
    }

    pub fn subscribe_positions(&self) -> Receiver<PositionSample> {
        self.positions.subscribe()
    }

    pub fn subscribe_events(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Block until the pass has ended or `timeout` elapses. Returns `true` if it ended.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        // Subscribed before the first check so an `Ended` published in between still wakes us.
        let wake = self.events.subscribe();
        loop {
            if self.status.has_ended() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            let _ = wake.recv_timeout(slice);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Err(err) = self.handle.stop() {
            tracing::warn!(error = %err, "stop on drop failed");
        }
        if let Some(mut tracker) = self.tracker.take() {
            tracker.shutdown();
        }
        let _ = self.handle.commands.send(EngineCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_engine<S: PacketSource, D: OutputDevice>(
    mut engine: PlaybackEngine<S, D>,
    commands: Receiver<EngineCommand>,
) {
    tracing::debug!("engine worker started");
    for command in commands.iter() {
        match command {
            EngineCommand::Play(reply) => {
                let _ = reply.send(engine.play());
            }
            EngineCommand::Pause(reply) => {
                let _ = reply.send(engine.pause());
            }
            EngineCommand::Toggle(reply) => {
                let result = if engine.state().is_audible() {
                    engine.pause()
                } else {
                    engine.play()
                };
                let _ = reply.send(result);
            }
            EngineCommand::Stop(reply) => {
                let _ = reply.send(engine.stop());
            }
            EngineCommand::Device(event) => engine.handle(event),
            EngineCommand::Shutdown => break,
        }
    }
    tracing::debug!(cursor = engine.cursor(), "engine worker exiting");
}
