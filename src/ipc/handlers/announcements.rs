use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

fn validate_fields(params: &serde_json::Value) -> Result<(String, String), serde_json::Value> {
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

    let body = params
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if body.is_empty() || body.chars().count() > 2000 {
        fields.insert("body".into(), json!("body must be 1-2000 characters"));
    }

    if !fields.is_empty() {
        return Err(json!({ "fields": fields }));
    }
    Ok((title, body))
}

fn handle_announcements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (title, body) = match validate_fields(&req.params) {
        Ok(v) => v,
        Err(details) => {
            return err(
                &req.id,
                "validation_failed",
                "one or more fields are invalid",
                Some(details),
            )
        }
    };

    let announcement_id = Uuid::new_v4().to_string();
    let published_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(id, title, body, published_at) VALUES(?, ?, ?, ?)",
        (&announcement_id, &title, &body, &published_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "announcements" })),
        );
    }

    ok(
        &req.id,
        json!({ "announcementId": announcement_id, "publishedAt": published_at }),
    )
}

fn handle_announcements_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let announcement_id = match req.params.get("announcementId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing announcementId", None),
    };
    let (title, body) = match validate_fields(&req.params) {
        Ok(v) => v,
        Err(details) => {
            return err(
                &req.id,
                "validation_failed",
                "one or more fields are invalid",
                Some(details),
            )
        }
    };

    // publishedAt is set at create and never rewritten by an edit.
    let changed = match conn.execute(
        "UPDATE announcements SET title = ?, body = ? WHERE id = ?",
        (&title, &body, &announcement_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "announcement not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_announcements_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let announcement_id = match req.params.get("announcementId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing announcementId", None),
    };

    let changed = match conn.execute("DELETE FROM announcements WHERE id = ?", [&announcement_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "announcement not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_announcements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "announcements": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, body, published_at
         FROM announcements
         ORDER BY published_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "body": r.get::<_, String>(2)?,
                "publishedAt": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(announcements) => ok(&req.id, json!({ "announcements": announcements })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(handle_announcements_create(state, req)),
        "announcements.update" => Some(handle_announcements_update(state, req)),
        "announcements.delete" => Some(handle_announcements_delete(state, req)),
        "announcements.list" => Some(handle_announcements_list(state, req)),
        _ => None,
    }
}
