use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::DateTime;
use serde_json::json;
use uuid::Uuid;

struct EventFields {
    title: String,
    description: String,
    location: String,
    starts_at: String,
    ends_at: String,
}

fn validate_fields(params: &serde_json::Value) -> Result<EventFields, serde_json::Value> {
    let mut fields = serde_json::Map::new();

    let title = params
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if title.is_empty() || title.chars().count() > 100 {
        fields.insert("title".into(), json!("title must be 1-100 characters"));
    }

    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if description.chars().count() > 1000 {
        fields.insert(
            "description".into(),
            json!("description must be at most 1000 characters"),
        );
    }

    let location = params
        .get("location")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if location.is_empty() || location.chars().count() > 200 {
        fields.insert("location".into(), json!("location must be 1-200 characters"));
    }

    let starts_at = params
        .get("startsAt")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let starts = DateTime::parse_from_rfc3339(&starts_at);
    if starts.is_err() {
        fields.insert(
            "startsAt".into(),
            json!("startsAt must be an RFC 3339 datetime"),
        );
    }

    let ends_at = params
        .get("endsAt")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let ends = DateTime::parse_from_rfc3339(&ends_at);
    if ends.is_err() {
        fields.insert("endsAt".into(), json!("endsAt must be an RFC 3339 datetime"));
    }

    if let (Ok(s), Ok(e)) = (starts, ends) {
        if e <= s {
            fields.insert("endsAt".into(), json!("endsAt must be after startsAt"));
        }
    }

    if !fields.is_empty() {
        return Err(json!({ "fields": fields }));
    }
    Ok(EventFields {
        title,
        description,
        location,
        starts_at,
        ends_at,
    })
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let fields = match validate_fields(&req.params) {
        Ok(f) => f,
        Err(details) => {
            return err(
                &req.id,
                "validation_failed",
                "one or more fields are invalid",
                Some(details),
            )
        }
    };

    let event_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO events(id, title, description, location, starts_at, ends_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &fields.title,
            &fields.description,
            &fields.location,
            &fields.starts_at,
            &fields.ends_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "events" })),
        );
    }

    ok(&req.id, json!({ "eventId": event_id }))
}

fn handle_events_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let event_id = match req.params.get("eventId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing eventId", None),
    };
    let fields = match validate_fields(&req.params) {
        Ok(f) => f,
        Err(details) => {
            return err(
                &req.id,
                "validation_failed",
                "one or more fields are invalid",
                Some(details),
            )
        }
    };

    let changed = match conn.execute(
        "UPDATE events
         SET title = ?, description = ?, location = ?, starts_at = ?, ends_at = ?
         WHERE id = ?",
        (
            &fields.title,
            &fields.description,
            &fields.location,
            &fields.starts_at,
            &fields.ends_at,
            &event_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "event not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let event_id = match req.params.get("eventId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing eventId", None),
    };

    let changed = match conn.execute("DELETE FROM events WHERE id = ?", [&event_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "event not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, description, location, starts_at, ends_at
         FROM events
         ORDER BY starts_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "location": r.get::<_, String>(3)?,
                "startsAt": r.get::<_, String>(4)?,
                "endsAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.create" => Some(handle_events_create(state, req)),
        "events.update" => Some(handle_events_update(state, req)),
        "events.delete" => Some(handle_events_delete(state, req)),
        "events.list" => Some(handle_events_list(state, req)),
        _ => None,
    }
}
