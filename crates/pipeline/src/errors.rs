//! Error and retry-policy types for the AgentFlow domain.
//!
//! [`PipelineError`] covers conditions that halt a run or reject an operation
//! on the domain model. [`ExecutorError`] is what a single executor step
//! reports once its local recovery (retry, back-off, fallback) is exhausted.
//! [`ProviderError`] is produced by the infrastructure adapters (language
//! model, web search) and carries enough information to decide on a retry.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AgentId, RunId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: timeouts, 5xx responses, provider rate limiting.
/// - `NonRetryable` errors: rejected credentials, invalid requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the step fails.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Provider errors (external collaborators)
// ---------------------------------------------------------------------------

/// Failure reported by an external collaborator (language model or search).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// The request did not complete within the client timeout.
    #[error("request timed out: {message}")]
    Timeout {
        /// Description from the transport layer.
        message: String,
    },

    /// The provider asked us to slow down (HTTP 429).
    #[error("rate limited by provider")]
    RateLimited {
        /// Delay requested by the provider's `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// The provider returned a server-side error (HTTP 5xx).
    #[error("provider unavailable (HTTP {status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The connection could not be established or was reset.
    #[error("transport error: {message}")]
    Transport {
        /// Description from the transport layer.
        message: String,
    },

    /// Credentials were missing or rejected (HTTP 401/403).
    #[error("provider rejected credentials: {message}")]
    Unauthorized {
        /// Response body or reason phrase.
        message: String,
    },

    /// The request itself was invalid (other HTTP 4xx).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Response body or reason phrase.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed provider response: {message}")]
    MalformedResponse {
        /// Decoder error message.
        message: String,
    },
}

impl ProviderError {
    /// Classifies the error for the retry loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } | Self::Transport { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Unauthorized { .. } | Self::InvalidRequest { .. } | Self::MalformedResponse { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }

    /// Maps an unsuccessful HTTP status to an error.
    ///
    /// `retry_after` is the parsed `Retry-After` header, if any; `body` is
    /// the response text, kept for diagnostics.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let message = body.chars().take(500).collect::<String>();
        match status {
            401 | 403 => Self::Unauthorized { message },
            408 => Self::Timeout { message },
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Unavailable { status, message },
            _ => Self::InvalidRequest {
                message: format!("HTTP {status}: {message}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Executor errors
// ---------------------------------------------------------------------------

/// Failure of one executor step after local recovery was exhausted.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ExecutorError {
    /// A retryable condition persisted past the retry budget.
    #[error("transient failure during {operation}: {message}")]
    Transient {
        /// The external operation that failed (e.g. `"llm.complete"`).
        operation: String,
        /// Description of the last failure.
        message: String,
    },

    /// The shared rate limiter did not grant a token within the wait bound.
    #[error("rate limit exceeded during {operation} after waiting {waited:?}")]
    RateLimitExceeded {
        /// The external operation that was throttled.
        operation: String,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A non-retryable condition (bad credentials, invalid request).
    #[error("permanent failure during {operation}: {message}")]
    Permanent {
        /// The external operation that failed.
        operation: String,
        /// Description of the failure.
        message: String,
    },
}

impl ExecutorError {
    /// Creates an [`ExecutorError::Transient`].
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an [`ExecutorError::Permanent`].
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the transient family (including rate-limit exhaustion).
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent { .. })
    }
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

/// Failure of a [`crate::CheckpointStore`] operation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CheckpointError {
    /// No checkpoint exists for the run.
    #[error("no checkpoint found for run '{run_id}'")]
    NotFound {
        /// The run that was looked up.
        run_id: RunId,
    },

    /// The state could not be encoded or a stored snapshot could not be decoded.
    #[error("checkpoint serialisation failed: {message}")]
    Serialization {
        /// Encoder/decoder error message.
        message: String,
    },

    /// The backing storage failed.
    #[error("checkpoint storage failed: {message}")]
    Storage {
        /// Storage error message.
        message: String,
    },
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that halt a run or reject an operation on the domain model.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is invalid. Produced at load time; a run never
    /// starts with an invalid configuration.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// A quality criterion (or the validation score) was outside `[0, 1]`.
    #[error("Invalid score input: {criterion} = {value}")]
    InvalidScoreInput {
        /// Name of the offending criterion.
        criterion: String,
        /// The rejected value.
        value: f64,
    },

    /// An executor exhausted local recovery; the run stops.
    #[error("Executor '{agent}' failed: {source}")]
    ExecutorFailed {
        /// The executor that failed.
        agent: AgentId,
        /// The underlying failure.
        #[source]
        source: ExecutorError,
    },

    /// The checkpoint store failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Two partial updates from the same step wrote the same scalar field.
    #[error("Conflicting writes to field '{field}' within one step")]
    ConflictingWrite {
        /// The field written twice.
        field: &'static str,
    },

    /// A state invariant would have been broken.
    #[error("State invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl PipelineError {
    /// Shorthand for [`PipelineError::ConfigurationError`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_retry_policies() {
        let timeout = ProviderError::Timeout {
            message: "deadline".into(),
        };
        assert_eq!(timeout.retry_policy(), RetryPolicy::Retryable { after: None });

        let limited = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            limited.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(2))
            }
        );

        let unauthorized = ProviderError::Unauthorized {
            message: "bad key".into(),
        };
        assert!(!unauthorized.retry_policy().is_retryable());
    }

    #[test]
    fn rate_limit_exhaustion_counts_as_transient() {
        let err = ExecutorError::RateLimitExceeded {
            operation: "search".into(),
            waited: Duration::from_secs(5),
        };
        assert!(err.is_transient());
        assert!(!ExecutorError::permanent("llm.complete", "401").is_transient());
    }

    #[test]
    fn executor_failure_displays_agent_and_cause() {
        let err = PipelineError::ExecutorFailed {
            agent: AgentId::Researcher,
            source: ExecutorError::transient("search", "503"),
        };
        assert_eq!(
            err.to_string(),
            "Executor 'researcher' failed: transient failure during search: 503"
        );
    }

    #[test]
    fn http_status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, None, "bad key"),
            ProviderError::Unauthorized { .. }
        ));
        assert_eq!(
            ProviderError::from_status(429, Some(Duration::from_secs(3)), "").retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            ProviderError::from_status(503, None, "busy"),
            ProviderError::Unavailable { status: 503, .. }
        ));
        assert_eq!(
            ProviderError::from_status(400, None, "bad").retry_policy(),
            RetryPolicy::NonRetryable
        );
    }
}
