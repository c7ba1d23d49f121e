use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::kafka::EventProducer;
use crate::repo::TransactionalWriter;

/// Shared state handed to HTTP handlers.
///
/// Everything is constructed once at startup and passed down; no mutable
/// module-level state.
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: DbPool,
    pub writer: TransactionalWriter,
    pub producer: Arc<EventProducer>,
}
