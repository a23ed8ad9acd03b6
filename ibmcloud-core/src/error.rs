//! Error types for remote clients and reconciliation

use std::time::Duration;

use thiserror::Error;

use crate::resource::{LifecycleStatus, Observation};

/// Failure reported by a remote client call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The object does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, rate-limit or 5xx class failure, safe to retry
    #[error("transient error: {0}")]
    Transient(String),

    /// Validation, authorization or other 4xx class failure
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl ClientError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of a reconciler operation
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("resource {id} not found")]
    NotFound { id: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The poll loop ran out of time before reaching the target state
    #[error(
        "timed out after {timeout:?} waiting for {id} (last status: {})",
        last_status(.last_observed)
    )]
    ProvisioningTimeout {
        id: String,
        timeout: Duration,
        last_observed: Option<Observation>,
    },

    /// The remote object reached a failure state
    #[error("resource {id} failed in status '{status}': {reason}")]
    Failed {
        id: String,
        status: String,
        reason: String,
    },

    #[error("operation on {id} was cancelled")]
    Cancelled { id: String },

    #[error("invalid lifecycle transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
}

fn last_status(observation: &Option<Observation>) -> &str {
    observation
        .as_ref()
        .map(|o| o.status.as_str())
        .unwrap_or("none")
}

impl ReconcileError {
    /// Whether re-invoking the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::ProvisioningTimeout { .. } | Self::Cancelled { .. }
        )
    }
}

impl From<ClientError> for ReconcileError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(id) => ReconcileError::NotFound { id },
            ClientError::Transient(msg) => ReconcileError::Transient(msg),
            ClientError::Permanent(msg) => ReconcileError::Permanent(msg),
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
