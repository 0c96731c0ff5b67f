//! The authority client: endpoint abstraction, mutual-TLS HTTP transport,
//! and the bounded retry loop.
//!
//! [`AuthorityEndpoint`] is the seam. Production talks HTTPS through
//! [`HttpAuthorityEndpoint`]; tests script responses without a socket in
//! sight. The client retries only errors the endpoint marked retryable,
//! sleeps with exponential backoff between attempts, and checks the
//! caller's deadline before every attempt and every sleep.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Duration, Instant};

use crate::config::{EmitterConfig, Environment, TransportPolicy};
use crate::document::AccessKey;
use crate::sign::SignedDocument;
use crate::transport::envelope::{
    parse_query_response, parse_submission_response, query_envelope, submission_envelope,
    QueryOutcome, SubmissionOutcome,
};
use crate::transport::TransportError;

/// Anything that can carry an envelope to the authority and bring back the
/// raw response body.
///
/// Implementations classify their own failures: connectivity problems and
/// server errors as retryable variants, everything else as final.
#[async_trait]
pub trait AuthorityEndpoint: Send + Sync {
    async fn submit(&self, envelope: &str) -> Result<String, TransportError>;
    async fn query(&self, envelope: &str) -> Result<String, TransportError>;
}

#[async_trait]
impl<E: AuthorityEndpoint + ?Sized> AuthorityEndpoint for Arc<E> {
    async fn submit(&self, envelope: &str) -> Result<String, TransportError> {
        (**self).submit(envelope).await
    }

    async fn query(&self, envelope: &str) -> Result<String, TransportError> {
        (**self).query(envelope).await
    }
}

// ---------------------------------------------------------------------------
// HTTPS endpoint
// ---------------------------------------------------------------------------

/// The production endpoint: HTTPS POST with optional client identity for
/// mutual TLS.
pub struct HttpAuthorityEndpoint {
    client: reqwest::Client,
    submit_url: String,
    query_url: String,
}

impl HttpAuthorityEndpoint {
    /// Build the endpoint from emitter configuration. Loads the mutual-TLS
    /// identity from `tls_identity_path` when one is configured; the file
    /// must be a PEM bundle holding the client certificate and key.
    pub fn from_config(config: &EmitterConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.transport.request_timeout)
            .connect_timeout(config.transport.connect_timeout);

        if let Some(path) = &config.tls_identity_path {
            let pem = std::fs::read(path)
                .map_err(|e| TransportError::Identity(format!("{}: {e}", path.display())))?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| TransportError::Identity(e.to_string()))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self {
            client,
            submit_url: config.submit_endpoint(),
            query_url: config.query_endpoint(),
        })
    }

    async fn post(&self, url: &str, envelope: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/xml; charset=utf-8",
            )
            .body(envelope.to_string())
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TransportError::ServerError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Refused {
                message: format!("http status {status}"),
            });
        }
        response.text().await.map_err(classify_request_error)
    }
}

#[async_trait]
impl AuthorityEndpoint for HttpAuthorityEndpoint {
    async fn submit(&self, envelope: &str) -> Result<String, TransportError> {
        self.post(&self.submit_url, envelope).await
    }

    async fn query(&self, envelope: &str) -> Result<String, TransportError> {
        self.post(&self.query_url, envelope).await
    }
}

fn classify_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() {
        TransportError::Unreachable {
            message: err.to_string(),
        }
    } else {
        TransportError::Refused {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client with retry loop
// ---------------------------------------------------------------------------

/// Submission and query operations over any endpoint, with retry policy
/// and deadline enforcement applied uniformly.
pub struct AuthorityClient<E> {
    endpoint: E,
    environment: Environment,
    policy: TransportPolicy,
}

impl<E: AuthorityEndpoint> AuthorityClient<E> {
    pub fn new(endpoint: E, environment: Environment, policy: TransportPolicy) -> Self {
        Self {
            endpoint,
            environment,
            policy,
        }
    }

    /// Submit a single document as a batch of one.
    pub async fn submit_document(
        &self,
        document: &SignedDocument,
        deadline: Option<Instant>,
    ) -> Result<SubmissionOutcome, TransportError> {
        self.submit_batch(&next_batch_id(), &[document], deadline)
            .await
    }

    /// Submit a batch of signed documents.
    pub async fn submit_batch(
        &self,
        batch_id: &str,
        documents: &[&SignedDocument],
        deadline: Option<Instant>,
    ) -> Result<SubmissionOutcome, TransportError> {
        let envelope = submission_envelope(batch_id, documents, self.environment)?;
        tracing::debug!(
            batch_id,
            documents = documents.len(),
            "submitting batch to authority"
        );
        let body = self
            .with_retries(deadline, || self.endpoint.submit(&envelope))
            .await?;
        parse_submission_response(&body, self.environment)
    }

    /// Query the situation of one access key.
    pub async fn query(
        &self,
        access_key: &AccessKey,
        deadline: Option<Instant>,
    ) -> Result<QueryOutcome, TransportError> {
        let envelope = query_envelope(access_key, self.environment);
        let body = self
            .with_retries(deadline, || self.endpoint.query(&envelope))
            .await?;
        parse_query_response(&body, self.environment)
    }

    /// Run one transport operation under the retry policy.
    ///
    /// Attempt 0 runs immediately; attempt n sleeps `backoff_delay(n-1)`
    /// first. Non-retryable errors return at once. The deadline is checked
    /// before each attempt and before each sleep, so a bounded caller
    /// never waits out a backoff it cannot afford.
    async fn with_retries<F, Fut>(
        &self,
        deadline: Option<Instant>,
        attempt_fn: F,
    ) -> Result<String, TransportError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, TransportError>>,
    {
        let attempts = self.policy.max_retries + 1;
        let mut last: Option<TransportError> = None;

        for attempt in 0..attempts {
            if let Some(limit) = deadline {
                if Instant::now() >= limit {
                    return Err(TransportError::DeadlineExceeded);
                }
            }
            if attempt > 0 {
                let delay = backoff_delay(&self.policy, attempt - 1);
                if let Some(limit) = deadline {
                    if Instant::now() + delay >= limit {
                        return Err(TransportError::DeadlineExceeded);
                    }
                }
                sleep(delay).await;
            }

            match attempt_fn().await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "transport attempt failed, will retry");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt completed".into()),
        })
    }
}

/// Backoff before retry n: base doubled per failure, capped at the policy
/// maximum. The shift itself is capped so the multiplier cannot overflow.
pub(crate) fn backoff_delay(policy: &TransportPolicy, failed_attempts: u32) -> Duration {
    let shift = failed_attempts.min(6);
    policy
        .backoff_base
        .saturating_mul(1u32 << shift)
        .min(policy.backoff_max)
}

fn next_batch_id() -> String {
    // Numeric, unique enough for lot identification on the wire.
    format!(
        "{}{:03}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>() % 1000
    )
}

// ---------------------------------------------------------------------------
// Scripted endpoint for tests
// ---------------------------------------------------------------------------
