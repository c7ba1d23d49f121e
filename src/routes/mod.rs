mod events;
mod health;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        .route(
            "/event",
            post(events::create_event)
                .get(events::get_events_by_period)
                .patch(events::update_event),
        )
        .route("/event/:id", delete(events::delete_event))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(app_context)
}
