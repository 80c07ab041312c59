//! # Checkpoint
//!
//! Door-side ticket check-in validator.
//!
//! A session runs one strict pipeline:
//!
//! 1. [`acquisition`]: samples the camera and emits each presented code once, pausing itself
//! 2. [`engine`]: looks the ticket up and checks it in with a compare-and-swap on the store
//! 3. [`presentation`]: shows the classified result until the operator asks for the next scan
//!
//! [`session`] holds the reducer that sequences the three, [`controller`] runs it on a
//! [`gatecheck_runtime::Store`], and [`server`] exposes the ticket store and server-side scans
//! over HTTP.
//!
//! ## Example
//!
//! ```ignore
//! use checkpoint::{
//!     acquisition::ChannelSource, controller::CheckpointController, engine::ValidationEngine,
//!     presentation::TerminalDisplay, store::InMemoryTicketStore,
//! };
//!
//! let store = Arc::new(InMemoryTicketStore::new(Arc::new(SystemClock)));
//! let (frames, source) = ChannelSource::channel();
//! let controller = CheckpointController::start(
//!     source,
//!     AcquisitionConfig::default(),
//!     ValidationEngine::new(store),
//!     Arc::new(TerminalDisplay::stdout()),
//!     Some("Gate A".to_string()),
//! )
//! .await?;
//! let tally = controller.run(commands).await?;
//! ```

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod engine;
pub mod metrics;
pub mod presentation;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use controller::{CheckpointController, CheckpointError, OperatorCommand};
pub use engine::{OutcomeKind, ValidationEngine, ValidationOutcome};
pub use types::{Ticket, TicketId, TicketStatus, TicketUpdate};
