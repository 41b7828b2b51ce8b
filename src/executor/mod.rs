//! The host-supplied "raw execute" capability.
//!
//! The engine never talks to a database itself. Every query that misses the
//! cache is handed to a [`RawExecutor`] together with the checked-out
//! [`ConnectionSlot`] and an absolute deadline. The coordinator also
//! enforces the deadline, so an executor that ignores it is still cut off.

mod simulated;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BoxError;
use crate::model::QueryResult;
use crate::pool::ConnectionSlot;

pub use simulated::{SimulatedExecutor, SimulatedExecutorBuilder};

/// Runs one statement against the backing database.
#[async_trait]
pub trait RawExecutor: Send + Sync {
    /// Executes `query` with positional `params` on the connection behind
    /// `slot`. Implementations should give up once `deadline` passes.
    async fn execute(
        &self,
        slot: &ConnectionSlot,
        query: &str,
        params: &[Value],
        deadline: Instant,
    ) -> Result<QueryResult, BoxError>;
}

#[async_trait]
impl<T: RawExecutor + ?Sized> RawExecutor for Arc<T> {
    async fn execute(
        &self,
        slot: &ConnectionSlot,
        query: &str,
        params: &[Value],
        deadline: Instant,
    ) -> Result<QueryResult, BoxError> {
        (**self).execute(slot, query, params, deadline).await
    }
}
