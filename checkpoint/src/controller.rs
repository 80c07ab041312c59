//! Wires acquisition, the checkpoint store and operator commands into one session.

use crate::acquisition::{Acquisition, AcquisitionConfig, AcquisitionEvent, CameraError, CodeSource};
use crate::engine::ValidationEngine;
use crate::presentation::ResultDisplay;
use crate::session::{
    CheckpointAction, CheckpointEnvironment, CheckpointReducer, CheckpointState, Tally,
};
use gatecheck_runtime::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Store running one checkpoint session.
pub type CheckpointStore =
    Store<CheckpointState, CheckpointAction, CheckpointEnvironment, CheckpointReducer>;

/// How long in-flight validations get to finish when a session ends.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that end a checkpoint session.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The camera could not be opened or failed while sampling
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    /// The session store rejected an action or did not drain in time
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

/// Commands from the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Dismiss the result and re-arm the scanner
    ScanNext,
    /// End the session
    Quit,
}

/// One operator session at one door.
pub struct CheckpointController {
    store: CheckpointStore,
    acquisition: Acquisition,
    events: mpsc::Receiver<AcquisitionEvent>,
}

impl CheckpointController {
    /// Open the camera and build the session.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Camera`] if the camera cannot be opened.
    pub async fn start<S>(
        source: S,
        config: AcquisitionConfig,
        engine: ValidationEngine,
        display: Arc<dyn ResultDisplay>,
        operator: Option<String>,
    ) -> Result<Self, CheckpointError>
    where
        S: CodeSource + 'static,
    {
        let (acquisition, events) = Acquisition::start(source, config).await?;

        let environment = CheckpointEnvironment::new(
            engine,
            Arc::new(acquisition.clone()),
            Arc::clone(&display),
            operator,
        );
        let store = Store::new(CheckpointState::default(), CheckpointReducer::new(), environment);

        display.show_scanner();

        Ok(Self {
            store,
            acquisition,
            events,
        })
    }

    /// Handle to the session store, for observing state.
    #[must_use]
    pub fn store(&self) -> CheckpointStore {
        self.store.clone()
    }

    /// Handle to the running acquisition.
    #[must_use]
    pub fn acquisition(&self) -> Acquisition {
        self.acquisition.clone()
    }

    /// Run until the operator quits or the command channel closes.
    ///
    /// Returns the session tally.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Camera`] if the camera fails mid-session and
    /// [`CheckpointError::Store`] if in-flight work does not finish on shutdown.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<OperatorCommand>,
    ) -> Result<Tally, CheckpointError> {
        let outcome = loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(AcquisitionEvent::Decoded(raw)) => {
                        if let Err(error) = self.store.send(CheckpointAction::CodeDecoded { raw }).await {
                            break Err(error.into());
                        }
                    },
                    Some(AcquisitionEvent::Failed(error)) => break Err(CheckpointError::Camera(error)),
                    None => break Ok(()),
                },
                command = commands.recv() => match command {
                    Some(OperatorCommand::ScanNext) => {
                        if let Err(error) = self.store.send(CheckpointAction::Dismissed).await {
                            break Err(error.into());
                        }
                    },
                    Some(OperatorCommand::Quit) | None => break Ok(()),
                },
            }
        };

        self.acquisition.stop();
        self.store.shutdown(SESSION_SHUTDOWN_TIMEOUT).await?;

        let tally = self.store.state(|s| s.tally).await;
        tracing::info!(
            admitted = tally.admitted,
            duplicates = tally.duplicates,
            rejected = tally.rejected,
            system_errors = tally.system_errors,
            "Checkpoint session ended"
        );

        outcome.map(|()| tally)
    }
}

impl std::fmt::Debug for CheckpointController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointController")
            .field("acquisition", &self.acquisition)
            .finish_non_exhaustive()
    }
}
