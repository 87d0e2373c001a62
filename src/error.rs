//! Error taxonomy of the ingestion pipeline
//!
//! Only [`PipelineError::DependencyUnavailable`] and
//! [`PipelineError::SubscribeFailed`] ever leave `Pipeline::start`. Every
//! other variant is contained where it happens: logged, counted, and the
//! message or tick is dropped.

use std::fmt;

use crate::DecodeError;
use crate::bus::BusError;
use crate::storage::StorageError;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// External dependency acquired during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Store,
    Bus,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Store => write!(f, "store"),
            Dependency::Bus => write!(f, "message bus"),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Bootstrap exhausted its retries
    DependencyUnavailable {
        dependency: Dependency,
        attempts: u32,
        last_error: String,
    },

    /// No live store handle at call time
    StoreUnavailable,

    /// The store rejected a write
    PersistenceFailed(StorageError),

    /// A store maintenance job (aggregation, retention) failed
    MaintenanceFailed(StorageError),

    /// Inbound payload was not a valid event
    DecodeFailed(DecodeError),

    /// The bus rejected an outbound publish
    PublishFailed(BusError),

    /// A topic subscription could not be registered during startup
    SubscribeFailed { pattern: String, source: BusError },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::DependencyUnavailable {
                dependency,
                attempts,
                last_error,
            } => write!(
                f,
                "{dependency} unavailable after {attempts} attempts (last error: {last_error})"
            ),
            PipelineError::StoreUnavailable => write!(f, "no store connection held"),
            PipelineError::PersistenceFailed(err) => write!(f, "failed to persist event: {err}"),
            PipelineError::MaintenanceFailed(err) => write!(f, "store maintenance failed: {err}"),
            PipelineError::DecodeFailed(err) => write!(f, "failed to decode message: {err}"),
            PipelineError::PublishFailed(err) => write!(f, "failed to publish event: {err}"),
            PipelineError::SubscribeFailed { pattern, source } => {
                write!(f, "failed to subscribe to '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::PersistenceFailed(err) | PipelineError::MaintenanceFailed(err) => {
                Some(err)
            }
            PipelineError::DecodeFailed(err) => Some(err),
            PipelineError::PublishFailed(err) => Some(err),
            PipelineError::SubscribeFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(err: DecodeError) -> Self {
        PipelineError::DecodeFailed(err)
    }
}
