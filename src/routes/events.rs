use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::model::{Event, EventPatch};
use crate::repo::events;

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_USER_ID_LEN: usize = 100;

fn validate_event(event: &Event) -> AppResult<()> {
    let title_len = event.title.chars().count();
    if title_len < 1 || title_len > MAX_TITLE_LEN {
        return Err(AppError::validation("title must be 1..200 characters"));
    }

    let user_len = event.user_id.chars().count();
    if user_len < 1 || user_len > MAX_USER_ID_LEN {
        return Err(AppError::validation("userID must be 1..100 characters"));
    }

    if event.description_event.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::validation(
            "descriptionEvent must be at most 1000 characters",
        ));
    }

    if event.end_date_event <= event.date_event {
        return Err(AppError::validation("endDateEvent must be after dateEvent"));
    }

    if let Some(notification) = event.time_for_notification {
        if notification >= event.date_event {
            return Err(AppError::validation(
                "timeForNotification must be before dateEvent",
            ));
        }
    }

    Ok(())
}

fn validate_patch(patch: &EventPatch) -> AppResult<()> {
    if let Some(title) = patch.title.as_deref().filter(|t| !t.is_empty()) {
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(AppError::validation("title must be 1..200 characters"));
        }
    }

    if let Some(user_id) = patch.user_id.as_deref().filter(|u| !u.is_empty()) {
        if user_id.chars().count() > MAX_USER_ID_LEN {
            return Err(AppError::validation("userID must be 1..100 characters"));
        }
    }

    if let Some(description) = patch.description_event.as_deref() {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AppError::validation(
                "descriptionEvent must be at most 1000 characters",
            ));
        }
    }

    if let (Some(start), Some(end)) = (patch.date_event, patch.end_date_event) {
        if end <= start {
            return Err(AppError::validation("endDateEvent must be after dateEvent"));
        }
    }

    if let (Some(notification), Some(start)) = (patch.time_for_notification, patch.date_event) {
        if notification >= start {
            return Err(AppError::validation(
                "timeForNotification must be before dateEvent",
            ));
        }
    }

    Ok(())
}

/// POST /event
///
/// Commits the event and its outbox snapshot in one transaction; a replay of
/// an existing id answers 409 and publishes nothing.
pub async fn create_event(
    State(app_context): State<Arc<AppContext>>,
    Json(event): Json<Event>,
) -> Result<impl IntoResponse, AppError> {
    validate_event(&event)?;

    let payload = serde_json::to_value(&event)?;
    app_context.writer.create_event(&event, payload).await?;

    Ok((StatusCode::OK, Json(json!({ "description": "ok" }))))
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// GET /event?start=..&end=..
pub async fn get_events_by_period(
    State(app_context): State<Arc<AppContext>>,
    Query(period): Query<PeriodQuery>,
) -> Result<impl IntoResponse, AppError> {
    if period.end < period.start {
        return Err(AppError::validation("end must not be before start"));
    }

    let events = events::get_events_by_period(&app_context.pool, period.start, period.end).await?;
    Ok((StatusCode::OK, Json(events)))
}

/// PATCH /event
///
/// Partial update; absent and empty fields keep stored values. Updates do
/// not publish to the outbox.
pub async fn update_event(
    State(app_context): State<Arc<AppContext>>,
    Json(patch): Json<EventPatch>,
) -> Result<impl IntoResponse, AppError> {
    validate_patch(&patch)?;

    events::update_event(&app_context.pool, &patch).await?;
    Ok((StatusCode::OK, Json(json!({ "description": "ok" }))))
}

/// DELETE /event/{id}
pub async fn delete_event(
    State(app_context): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    events::delete_event(&app_context.pool, id).await?;
    Ok((StatusCode::OK, Json(json!({ "description": "ok" }))))
}
