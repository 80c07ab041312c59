//! REST ticket store.
//!
//! Talks to the ticket API exposed by the `server` binary (or any API speaking the same
//! JSON). The compare-and-swap is evaluated on the server; a `409` carries the record
//! that made the condition fail.

use super::{TicketStore, TicketStoreError, UpdateOutcome};
use crate::config::RestConfig;
use crate::types::{Ticket, TicketId, TicketStatus, TicketUpdate};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of `POST /api/tickets/{id}/conditional-update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalUpdateRequest {
    /// Status the ticket must still have
    pub expected_status: TicketStatus,
    /// Changes to apply when it does
    pub update: TicketUpdate,
}

/// Response of `POST /api/tickets/{id}/conditional-update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalUpdateResponse {
    /// Whether the update was written
    pub applied: bool,
    /// Record after the call; `None` if the ticket does not exist
    pub ticket: Option<Ticket>,
}

impl From<UpdateOutcome> for ConditionalUpdateResponse {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Applied(ticket) => Self {
                applied: true,
                ticket: Some(ticket),
            },
            UpdateOutcome::ConditionFailed(ticket) => Self {
                applied: false,
                ticket,
            },
        }
    }
}

/// Ticket store reached over HTTP.
#[derive(Clone)]
pub struct RestTicketStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl RestTicketStore {
    /// Create a client for the API at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Transport`] if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &RestConfig) -> Result<Self, TicketStoreError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| TicketStoreError::Transport(format!("Invalid API URL {}: {e}", config.base_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| TicketStoreError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, TicketStoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TicketStoreError::Transport(format!("API URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn unexpected(response: reqwest::Response) -> TicketStoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            TicketStoreError::Unavailable(format!("{status}: {body}"))
        } else {
            TicketStoreError::Transport(format!("Unexpected status {status}: {body}"))
        }
    }
}

#[async_trait]
impl TicketStore for RestTicketStore {
    #[tracing::instrument(skip(self), fields(ticket_id = %id))]
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        let url = self.url(&["api", "tickets", id.as_str()])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| TicketStoreError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<Ticket>()
                .await
                .map(Some)
                .map_err(|e| TicketStoreError::Decode(e.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(response).await),
        }
    }

    #[tracing::instrument(skip(self, update), fields(ticket_id = %id, expected = %expected))]
    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        let url = self.url(&["api", "tickets", id.as_str(), "conditional-update"])?;
        let body = ConditionalUpdateRequest {
            expected_status: expected.clone(),
            update: update.clone(),
        };

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TicketStoreError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CONFLICT => {
                let parsed = response
                    .json::<ConditionalUpdateResponse>()
                    .await
                    .map_err(|e| TicketStoreError::Decode(e.to_string()))?;
                match (parsed.applied, parsed.ticket) {
                    (true, Some(ticket)) => Ok(UpdateOutcome::Applied(ticket)),
                    (true, None) => Err(TicketStoreError::Decode(
                        "applied update without a ticket".to_string(),
                    )),
                    (false, ticket) => Ok(UpdateOutcome::ConditionFailed(ticket)),
                }
            },
            StatusCode::NOT_FOUND => Ok(UpdateOutcome::ConditionFailed(None)),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn health(&self) -> Result<(), TicketStoreError> {
        let url = self.url(&["health"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TicketStoreError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::unexpected(response).await)
        }
    }
}
