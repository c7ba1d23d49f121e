use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model::{Event, EventPatch};

const DEFAULT_DELETE_DAYS: i32 = 365;

const CREATE_EVENT: &str = r#"
INSERT INTO events (
    id, title, start_date_event, end_date_event, creation_date,
    description_event, user_id, time_for_notification, rq_tm
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (id) DO NOTHING
RETURNING id
"#;

const GET_EVENTS_BY_PERIOD: &str = r#"
SELECT id, title, start_date_event, end_date_event, creation_date,
       description_event, user_id, time_for_notification, rq_tm
FROM events
WHERE start_date_event >= $1 AND end_date_event <= $2
ORDER BY start_date_event
"#;

const DELETE_EVENT: &str = "DELETE FROM events WHERE id = $1";

const DELETE_OLD_EVENTS: &str = r#"
DELETE FROM events
WHERE creation_date < now() - make_interval(days => $1)
"#;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// Inserts the event, returning `false` when the id already exists.
pub async fn create_event<'e>(
    executor: impl PgExecutor<'e>,
    event: &Event,
) -> Result<bool, sqlx::Error> {
    let inserted: Result<Option<Uuid>, sqlx::Error> = sqlx::query_scalar(CREATE_EVENT)
        .bind(event.id)
        .bind(&event.title)
        .bind(event.date_event)
        .bind(event.end_date_event)
        .bind(event.creation_date)
        .bind(&event.description_event)
        .bind(&event.user_id)
        .bind(event.time_for_notification)
        .bind(event.rq_tm)
        .fetch_optional(executor)
        .await;

    match inserted {
        Ok(row) => Ok(row.is_some()),
        // A concurrent insert can still race in ahead of the conflict clause.
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

fn provided(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

/// Applies a partial update. Absent and empty fields are ignored; any change
/// moves the `updated_at` watermark.
pub async fn update_event<'e>(
    executor: impl PgExecutor<'e>,
    patch: &EventPatch,
) -> AppResult<()> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE events SET ");
    let mut fields = builder.separated(", ");
    let mut any = false;

    if let Some(title) = provided(&patch.title) {
        fields.push("title = ").push_bind_unseparated(title.to_string());
        any = true;
    }
    if let Some(description) = provided(&patch.description_event) {
        fields
            .push("description_event = ")
            .push_bind_unseparated(description.to_string());
        any = true;
    }
    if let Some(user_id) = provided(&patch.user_id) {
        fields.push("user_id = ").push_bind_unseparated(user_id.to_string());
        any = true;
    }
    if let Some(date_event) = patch.date_event {
        fields
            .push("start_date_event = ")
            .push_bind_unseparated(date_event);
        any = true;
    }
    if let Some(end_date_event) = patch.end_date_event {
        fields
            .push("end_date_event = ")
            .push_bind_unseparated(end_date_event);
        any = true;
    }
    if let Some(creation_date) = patch.creation_date {
        fields
            .push("creation_date = ")
            .push_bind_unseparated(creation_date);
        any = true;
    }
    if let Some(rq_tm) = patch.rq_tm {
        fields.push("rq_tm = ").push_bind_unseparated(rq_tm);
        any = true;
    }
    if let Some(notification) = patch.time_for_notification {
        fields
            .push("time_for_notification = ")
            .push_bind_unseparated(notification);
        any = true;
    }

    if !any {
        tracing::warn!(event_id = %patch.id, "no fields to update");
        return Ok(());
    }

    fields.push("updated_at = now()");
    builder.push(" WHERE id = ").push_bind(patch.id);

    let result = builder.build().execute(executor).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn delete_event<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> AppResult<()> {
    let result = sqlx::query(DELETE_EVENT).bind(id).execute(executor).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn get_events_by_period<'e>(
    executor: impl PgExecutor<'e>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Event>, sqlx::Error> {
    sqlx::query_as::<_, Event>(GET_EVENTS_BY_PERIOD)
        .bind(start)
        .bind(end)
        .fetch_all(executor)
        .await
}

/// Bulk purge of events older than `days`. A value of 0 is a deliberate
/// no-op so a misconfigured purge can never delete everything.
pub async fn delete_old_events<'e>(
    executor: impl PgExecutor<'e>,
    days: Option<i32>,
) -> Result<u64, sqlx::Error> {
    let days = match days {
        Some(0) => {
            tracing::warn!("days_to_delete is 0, skipping purge to avoid deleting all events");
            return Ok(0);
        }
        Some(d) if d > 0 => d,
        _ => DEFAULT_DELETE_DAYS,
    };

    let result = sqlx::query(DELETE_OLD_EVENTS)
        .bind(days)
        .execute(executor)
        .await?;

    let deleted = result.rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, days, "purged old events");
    } else {
        tracing::debug!(days, "no events older than retention window");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    // connect_lazy performs no I/O, so a patch that resolves to zero fields
    // must return before ever touching the pool.
    #[tokio::test]
    async fn empty_patch_is_a_no_op() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let patch = EventPatch {
            id: Uuid::nil(),
            title: Some(String::new()),
            date_event: None,
            end_date_event: None,
            creation_date: None,
            description_event: None,
            user_id: Some(String::new()),
            time_for_notification: None,
            rq_tm: None,
        };
        assert!(update_event(&pool, &patch).await.is_ok());
    }
}
