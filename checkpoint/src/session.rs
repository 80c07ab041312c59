//! Checkpoint session state machine.
//!
//! ```text
//! Idle --CodeDecoded--> Validating --ValidationCompleted--> ResultShown --Dismissed--> Idle
//! ```
//!
//! The reducer only decides; pausing the scanner, validating, rendering and re-arming all
//! happen in effects run by the store.

use crate::acquisition::{AcquisitionState, ScannerControl};
use crate::engine::{OutcomeKind, ValidationEngine, ValidationOutcome};
use crate::presentation::{ResultDisplay, ResultView, Severity};
use gatecheck_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
use std::sync::Arc;

/// Where the checkpoint is in its cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Scanner armed, waiting for a code
    #[default]
    Idle,
    /// A code is being validated; the scanner is paused
    Validating {
        /// Code as decoded
        code: String,
    },
    /// A result is on screen; the scanner stays paused until dismissal
    ResultShown {
        /// Outcome on screen
        kind: OutcomeKind,
    },
}

impl Phase {
    /// Waiting for a code
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// A validation is in flight
    #[must_use]
    pub const fn is_validating(&self) -> bool {
        matches!(self, Self::Validating { .. })
    }

    /// A result is on screen
    #[must_use]
    pub const fn is_result_shown(&self) -> bool {
        matches!(self, Self::ResultShown { .. })
    }
}

/// Outcome counts for the operator summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    /// Tickets admitted
    pub admitted: u32,
    /// Tickets already used
    pub duplicates: u32,
    /// Revoked, unknown, or not found
    pub rejected: u32,
    /// Store failures
    pub system_errors: u32,
}

impl Tally {
    /// Count one outcome.
    pub fn record(&mut self, kind: OutcomeKind) {
        let counter = match (kind.severity(), kind) {
            (_, OutcomeKind::SystemError) => &mut self.system_errors,
            (Severity::Success, _) => &mut self.admitted,
            (Severity::Warning, _) => &mut self.duplicates,
            (Severity::Error, _) => &mut self.rejected,
        };
        *counter += 1;
    }

    /// Number of validations counted.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.admitted + self.duplicates + self.rejected + self.system_errors
    }
}

/// State of one operator session.
#[derive(Clone, Debug, Default)]
pub struct CheckpointState {
    /// Current phase
    pub phase: Phase,
    /// Most recent outcome
    pub last_outcome: Option<ValidationOutcome>,
    /// Outcome counts
    pub tally: Tally,
}

/// Inputs to the checkpoint.
#[derive(Clone, Debug)]
pub enum CheckpointAction {
    /// The scanner emitted a code
    CodeDecoded {
        /// Raw decoded text
        raw: String,
    },
    /// The engine classified the code
    ValidationCompleted {
        /// Engine result
        outcome: ValidationOutcome,
    },
    /// The operator pressed "scan next"
    Dismissed,
}

/// Dependencies of the checkpoint reducer.
#[derive(Clone)]
pub struct CheckpointEnvironment {
    /// Validation engine
    pub engine: ValidationEngine,
    /// Running acquisition
    pub scanner: Arc<dyn ScannerControl>,
    /// Operator views
    pub display: Arc<dyn ResultDisplay>,
    /// Operator name stamped on check-ins
    pub operator: Option<String>,
}

impl CheckpointEnvironment {
    /// Bundle the checkpoint's dependencies.
    #[must_use]
    pub fn new(
        engine: ValidationEngine,
        scanner: Arc<dyn ScannerControl>,
        display: Arc<dyn ResultDisplay>,
        operator: Option<String>,
    ) -> Self {
        Self {
            engine,
            scanner,
            display,
            operator,
        }
    }
}

/// Reducer for the checkpoint session.
#[derive(Clone, Debug, Default)]
pub struct CheckpointReducer;

impl CheckpointReducer {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate(raw: String, env: &CheckpointEnvironment) -> Effect<CheckpointAction> {
        let engine = env.engine.clone();
        let scanner = Arc::clone(&env.scanner);
        let display = Arc::clone(&env.display);
        let operator = env.operator.clone();

        Effect::future(async move {
            scanner.pause();
            display.show_validating(raw.trim());
            let outcome = engine.validate(&raw, operator.as_deref()).await;
            Some(CheckpointAction::ValidationCompleted { outcome })
        })
    }

    fn render(outcome: &ValidationOutcome, env: &CheckpointEnvironment) -> Effect<CheckpointAction> {
        let display = Arc::clone(&env.display);
        let view = ResultView::from(outcome);

        Effect::future(async move {
            display.show_result(&view);
            None
        })
    }

    fn rearm(env: &CheckpointEnvironment) -> Effect<CheckpointAction> {
        let display = Arc::clone(&env.display);
        let scanner = Arc::clone(&env.scanner);

        Effect::future(async move {
            display.show_scanner();
            if scanner.state() != AcquisitionState::Scanning {
                scanner.resume();
                tracing::debug!("Scanner resumed");
            }
            None
        })
    }
}

impl Reducer for CheckpointReducer {
    type State = CheckpointState;
    type Action = CheckpointAction;
    type Environment = CheckpointEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            CheckpointAction::CodeDecoded { raw } => {
                if !state.phase.is_idle() {
                    tracing::warn!(phase = ?state.phase, "Ignoring decode while busy");
                    return SmallVec::new();
                }
                tracing::info!(code = %raw.trim(), "Validating code");
                state.phase = Phase::Validating {
                    code: raw.trim().to_string(),
                };
                smallvec![Self::validate(raw, env)]
            },

            CheckpointAction::ValidationCompleted { outcome } => {
                if !state.phase.is_validating() {
                    tracing::warn!(phase = ?state.phase, "Ignoring result without validation in flight");
                    return SmallVec::new();
                }
                state.phase = Phase::ResultShown { kind: outcome.kind };
                state.tally.record(outcome.kind);
                let effect = Self::render(&outcome, env);
                state.last_outcome = Some(outcome);
                smallvec![effect]
            },

            CheckpointAction::Dismissed => match state.phase {
                Phase::ResultShown { .. } => {
                    state.phase = Phase::Idle;
                    smallvec![Self::rearm(env)]
                },
                // Armed already, or paused on an emission whose decode is still queued
                Phase::Idle => {
                    tracing::debug!("Dismiss ignored while idle");
                    SmallVec::new()
                },
                Phase::Validating { .. } => {
                    tracing::debug!("Dismiss ignored while validating");
                    SmallVec::new()
                },
            },
        }
    }
}
