//! Event persistence
//!
//! The only write path from the dispatch handlers into the store. Storage
//! is an idempotent upsert keyed by event id, so redelivery or a retried
//! publish never produces a duplicate row.

use tracing::{instrument, trace};

use crate::storage::{EventRow, EventStore};
use crate::{DataPoint, PipelineError, PipelineResult};

/// Persist one event
///
/// Fails with [`PipelineError::StoreUnavailable`] when no store handle is
/// held, which callers can tell apart from a store-side rejection.
#[instrument(skip_all, fields(id = %event.id))]
pub async fn save(store: Option<&dyn EventStore>, event: &DataPoint) -> PipelineResult<()> {
    let Some(store) = store else {
        return Err(PipelineError::StoreUnavailable);
    };

    let row = EventRow::from_data_point(event).map_err(PipelineError::PersistenceFailed)?;

    store
        .upsert_event(&row)
        .await
        .map_err(PipelineError::PersistenceFailed)?;

    trace!("event persisted");
    Ok(())
}
