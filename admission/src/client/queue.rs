//! Admission-control service client.

use super::wire::{
    self, CallerRequest, ClaimResponse, JoinRequest, JoinResponse, Operation, PositionResponse,
};
use crate::error::QueueError;
use crate::types::{
    AccessGrant, CallerId, CallerInfo, JoinOutcome, PollOutcome, QueueStatus, ShowId,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use turnstile_runtime::metrics::{QUEUE_REQUESTS, counter};

/// The five queue operations.
///
/// Pure transport: no retries and no state. Every failure is already
/// classified into [`QueueError`].
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Current queue status for a show
    async fn status(&self, show_id: &ShowId) -> Result<QueueStatus, QueueError>;

    /// Join the queue
    async fn join(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
        caller_info: Option<&CallerInfo>,
    ) -> Result<JoinOutcome, QueueError>;

    /// Poll the caller's position
    async fn position(&self, show_id: &ShowId, caller_id: &CallerId)
    -> Result<PollOutcome, QueueError>;

    /// Exchange position 1 for an access grant
    async fn claim_access(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
    ) -> Result<AccessGrant, QueueError>;

    /// Leave the queue
    async fn leave(&self, show_id: &ShowId, caller_id: &CallerId) -> Result<(), QueueError>;
}

/// HTTP/JSON implementation of [`QueueService`]
#[derive(Clone, Debug)]
pub struct HttpQueueClient {
    client: Client,
    base_url: String,
}

impl HttpQueueClient {
    /// Create a client for `base_url` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client around an existing `reqwest::Client`
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, show_id: &ShowId, path: &str) -> String {
        format!("{}/queue/{show_id}/{path}", self.base_url)
    }

    async fn execute(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<Response, QueueError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return Err(record(operation, wire::transport_error(&error))),
        };

        let status = response.status();
        if status.is_success() {
            counter!(QUEUE_REQUESTS, "operation" => operation.as_str(), "outcome" => "ok")
                .increment(1);
            return Ok(response);
        }

        let retry_after = wire::retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(record(
            operation,
            wire::classify_queue_status(operation, status, retry_after, body),
        ))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<T, QueueError> {
        self.execute(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| record(operation, QueueError::InvalidResponse(e.to_string())))
    }
}

fn record(operation: Operation, error: QueueError) -> QueueError {
    counter!(QUEUE_REQUESTS, "operation" => operation.as_str(), "outcome" => error.kind())
        .increment(1);
    tracing::debug!(operation = operation.as_str(), %error, "Queue request failed");
    error
}

#[async_trait]
impl QueueService for HttpQueueClient {
    async fn status(&self, show_id: &ShowId) -> Result<QueueStatus, QueueError> {
        let request = self.client.get(self.url(show_id, "status"));
        self.execute_json(Operation::Status, request).await
    }

    async fn join(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
        caller_info: Option<&CallerInfo>,
    ) -> Result<JoinOutcome, QueueError> {
        let request = self.client.post(self.url(show_id, "join")).json(&JoinRequest {
            caller_id,
            caller_info,
        });
        let response: JoinResponse = self.execute_json(Operation::Join, request).await?;
        Ok(response.into_outcome(show_id, caller_id))
    }

    async fn position(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
    ) -> Result<PollOutcome, QueueError> {
        let request = self
            .client
            .get(self.url(show_id, "position"))
            .query(&[("callerId", caller_id.as_str())]);
        let response: PositionResponse = self.execute_json(Operation::Position, request).await?;
        Ok(response.into_outcome(show_id))
    }

    async fn claim_access(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
    ) -> Result<AccessGrant, QueueError> {
        let request = self
            .client
            .post(self.url(show_id, "claim-access"))
            .json(&CallerRequest { caller_id });
        let response: ClaimResponse = self.execute_json(Operation::Claim, request).await?;
        Ok(response.into_grant(show_id))
    }

    async fn leave(&self, show_id: &ShowId, caller_id: &CallerId) -> Result<(), QueueError> {
        let request = self
            .client
            .delete(self.url(show_id, "leave"))
            .json(&CallerRequest { caller_id });
        self.execute(Operation::Leave, request).await.map(|_| ())
    }
}
