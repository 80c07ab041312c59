//! Code acquisition.
//!
//! A sampling loop reads frames from a [`CodeSource`] at a fixed rate and feeds them to a
//! [`ScanSession`], which decides whether a decode is a new presentation. Decoded codes
//! leave through an explicit channel, at most one per presentation, and the session pauses
//! itself on every emission until [`ScannerControl::resume`] is called.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Errors raised by the camera or decoder. All of them end the acquisition session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The operator denied camera access
    #[error("Camera permission denied")]
    PermissionDenied,

    /// No camera is attached
    #[error("No camera device found")]
    NoDevice,

    /// The device failed while sampling
    #[error("Camera failure: {0}")]
    Device(String),
}

/// Sampling settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Frames sampled per second
    pub samples_per_second: u32,
    /// Edge of the square decode region, in pixels
    pub region_size: u32,
}

impl AcquisitionConfig {
    /// Default sampling rate
    pub const DEFAULT_SAMPLES_PER_SECOND: u32 = 10;
    /// Default decode region edge
    pub const DEFAULT_REGION_SIZE: u32 = 250;

    /// Time between two samples.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(1) / self.samples_per_second.max(1)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            samples_per_second: Self::DEFAULT_SAMPLES_PER_SECOND,
            region_size: Self::DEFAULT_REGION_SIZE,
        }
    }
}

/// Whether decodes are currently emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Decodes of new presentations are emitted
    Scanning,
    /// Frames are sampled but nothing is emitted
    Paused,
}

/// Presentation tracking for one operator session.
#[derive(Debug)]
pub struct ScanSession {
    state: AcquisitionState,
    last_decoded: Option<String>,
}

impl ScanSession {
    /// A fresh session, scanning, with nothing in frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AcquisitionState::Scanning,
            last_decoded: None,
        }
    }

    /// Feed one sampled frame; `None` is a frame without a readable code.
    ///
    /// Returns the code to emit, if this frame starts a new presentation while scanning.
    /// Emitting pauses the session.
    pub fn observe(&mut self, frame: Option<&str>) -> Option<String> {
        let Some(code) = frame else {
            self.last_decoded = None;
            return None;
        };

        if self.state == AcquisitionState::Paused {
            return None;
        }
        if self.last_decoded.as_deref() == Some(code) {
            return None;
        }

        self.last_decoded = Some(code.to_string());
        self.state = AcquisitionState::Paused;
        Some(code.to_string())
    }

    /// Stop emitting.
    pub fn pause(&mut self) {
        self.state = AcquisitionState::Paused;
    }

    /// Start emitting again. Returns `false` if already scanning.
    pub fn resume(&mut self) -> bool {
        if self.state == AcquisitionState::Scanning {
            return false;
        }
        self.state = AcquisitionState::Scanning;
        true
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Last code seen in frame, if it is still there.
    #[must_use]
    pub fn last_decoded(&self) -> Option<&str> {
        self.last_decoded.as_deref()
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A camera plus decoder.
#[async_trait]
pub trait CodeSource: Send {
    /// Acquire the device and configure the decode region.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError`] if access is denied or no device exists.
    async fn open(&mut self, config: &AcquisitionConfig) -> Result<(), CameraError>;

    /// Sample one frame and decode it. `Ok(None)` means no code is in frame.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::Device`] if the device stopped working.
    async fn sample(&mut self) -> Result<Option<String>, CameraError>;
}

/// Pause/resume control over a running acquisition.
pub trait ScannerControl: Send + Sync {
    /// Stop emitting decodes.
    fn pause(&self);

    /// Emit decodes again. Returns `false` if already scanning.
    fn resume(&self) -> bool;

    /// Current state
    fn state(&self) -> AcquisitionState;
}

/// Events leaving the sampling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    /// A new presentation was decoded; the scanner is now paused
    Decoded(String),
    /// The device failed; the loop has ended
    Failed(CameraError),
}

/// Handle to a running acquisition.
#[derive(Clone, Debug)]
pub struct Acquisition {
    session: Arc<Mutex<ScanSession>>,
    stopped: Arc<AtomicBool>,
    config: AcquisitionConfig,
}

impl Acquisition {
    /// Open `source` and start sampling it.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError`] if the source cannot be opened. There is no retry.
    pub async fn start<S>(
        mut source: S,
        config: AcquisitionConfig,
    ) -> Result<(Self, mpsc::Receiver<AcquisitionEvent>), CameraError>
    where
        S: CodeSource + 'static,
    {
        source.open(&config).await?;

        let (events, receiver) = mpsc::channel(8);
        let handle = Self {
            session: Arc::new(Mutex::new(ScanSession::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            config,
        };

        tracing::info!(
            samples_per_second = config.samples_per_second,
            region_size = config.region_size,
            "Code acquisition started"
        );

        tokio::spawn(handle.clone().run(source, events));
        Ok((handle, receiver))
    }

    /// End the sampling loop. The event channel closes after the next tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether [`Acquisition::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sampling settings in use
    #[must_use]
    pub const fn config(&self) -> AcquisitionConfig {
        self.config
    }

    fn session(&self) -> MutexGuard<'_, ScanSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run<S: CodeSource>(self, mut source: S, events: mpsc::Sender<AcquisitionEvent>) {
        let mut ticker = tokio::time::interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_stopped() {
                break;
            }

            match source.sample().await {
                Ok(frame) => {
                    let decoded = self.session().observe(frame.as_deref());
                    if let Some(code) = decoded {
                        tracing::debug!(code = %code, "Decoded new presentation");
                        if events.send(AcquisitionEvent::Decoded(code)).await.is_err() {
                            break;
                        }
                    }
                },
                Err(error) => {
                    tracing::error!(%error, "Camera failed, ending acquisition");
                    let _ = events.send(AcquisitionEvent::Failed(error)).await;
                    break;
                },
            }
        }

        tracing::info!("Code acquisition stopped");
    }
}

impl ScannerControl for Acquisition {
    fn pause(&self) {
        self.session().pause();
    }

    fn resume(&self) -> bool {
        self.session().resume()
    }

    fn state(&self) -> AcquisitionState {
        self.session().state()
    }
}

/// Source fed through a channel.
///
/// Each message replaces what is in frame (`Some(code)` presents a code, `None` clears
/// the frame). At most one message is taken per sample, so a present-then-clear pair is
/// always seen as two frames.
#[derive(Debug)]
pub struct ChannelSource {
    frames: mpsc::UnboundedReceiver<Option<String>>,
    current: Option<String>,
}

impl ChannelSource {
    /// Create a source and the sender that drives it.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<Option<String>>, Self) {
        let (sender, frames) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                frames,
                current: None,
            },
        )
    }
}

#[async_trait]
impl CodeSource for ChannelSource {
    async fn open(&mut self, _config: &AcquisitionConfig) -> Result<(), CameraError> {
        Ok(())
    }

    async fn sample(&mut self) -> Result<Option<String>, CameraError> {
        match self.frames.try_recv() {
            Ok(frame) => self.current = frame,
            Err(mpsc::error::TryRecvError::Empty) => {},
            Err(mpsc::error::TryRecvError::Disconnected) => {
                return Err(CameraError::Device("frame feed disconnected".to_string()));
            },
        }
        Ok(self.current.clone())
    }
}

/// Source that replays a fixed list of frames, then shows an empty frame forever.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Result<Option<String>, CameraError>>,
    open_error: Option<CameraError>,
    opened_with: Option<AcquisitionConfig>,
}

impl ScriptedSource {
    /// Replay `frames` in order.
    #[must_use]
    pub fn new<I, T>(frames: I) -> Self
    where
        I: IntoIterator<Item = Option<T>>,
        T: Into<String>,
    {
        Self {
            frames: frames.into_iter().map(|f| Ok(f.map(Into::into))).collect(),
            ..Self::default()
        }
    }

    /// Fail to open with `error`.
    #[must_use]
    pub fn failing_open(error: CameraError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    /// Append a device failure after the scripted frames.
    #[must_use]
    pub fn then_fail(mut self, error: CameraError) -> Self {
        self.frames.push_back(Err(error));
        self
    }

    /// Configuration passed to `open`, if it was called.
    #[must_use]
    pub const fn opened_with(&self) -> Option<AcquisitionConfig> {
        self.opened_with
    }
}

#[async_trait]
impl CodeSource for ScriptedSource {
    async fn open(&mut self, config: &AcquisitionConfig) -> Result<(), CameraError> {
        if let Some(error) = self.open_error.take() {
            return Err(error);
        }
        self.opened_with = Some(*config);
        Ok(())
    }

    async fn sample(&mut self) -> Result<Option<String>, CameraError> {
        self.frames.pop_front().unwrap_or(Ok(None))
    }
}
