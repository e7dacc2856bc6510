use crate::groups::WorkshopGroup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::workshops::{SqliteStore, WorkshopStore};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
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

fn addressable_students(
    conn: &Connection,
    class_ids: &[String],
) -> Result<Vec<(String, String)>, String> {
    let placeholders = vec!["?"; class_ids.len()].join(", ");
    let sql = format!(
        "SELECT id, email FROM students
         WHERE class_id IN ({}) AND active = 1 AND email IS NOT NULL
         ORDER BY last_name, first_name",
        placeholders
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    stmt.query_map(rusqlite::params_from_iter(class_ids.iter()), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| e.to_string())
}

/// Creates the notification record, then queues one outbox email per
/// active, addressable student in the resolved classes. The out-of-process
/// sender drains the outbox against the email provider; queuing failures
/// after the notification row exists are logged and reflected only in the
/// reported count.
fn handle_notifications_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_raw = req
        .params
        .get("workshopGroup")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if group_raw.is_empty() {
        return err(&req.id, "bad_params", "missing workshopGroup", None);
    }
    let Some(group) = WorkshopGroup::parse(group_raw) else {
        return err(
            &req.id,
            "unknown_group",
            format!("unknown workshop group: {}", group_raw),
            None,
        );
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

    let class_ids = {
        let mut store = SqliteStore::new(conn);
        match store.class_ids_by_name(group.class_names()) {
            Ok(ids) => ids,
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        }
    };
    if class_ids.is_empty() {
        return err(
            &req.id,
            "no_matching_classes",
            format!("no CRC class records found for group {}", group.as_str()),
            None,
        );
    }

    let notification_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Err(e) = conn.execute(
        "INSERT INTO notifications(id, title, body, workshop_group, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&notification_id, &title, &body, group.as_str(), &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "notifications" })),
        );
    }

    let recipients = match addressable_students(conn, &class_ids) {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "outbox fan-out query failed for notification {}: {}",
                notification_id, e
            );
            Vec::new()
        }
    };

    let mut queued = 0usize;
    for (student_id, email) in &recipients {
        let outbox_id = Uuid::new_v4().to_string();
        match conn.execute(
            "INSERT INTO email_outbox(id, notification_id, student_id, recipient, status, queued_at)
             VALUES(?, ?, ?, ?, 'queued', ?)",
            (&outbox_id, &notification_id, student_id, email, &created_at),
        ) {
            Ok(_) => queued += 1,
            Err(e) => eprintln!(
                "outbox insert failed for notification {} student {}: {}",
                notification_id, student_id, e
            ),
        }
    }

    ok(
        &req.id,
        json!({ "notificationId": notification_id, "queuedEmails": queued }),
    )
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "notifications": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT n.id, n.title, n.body, n.workshop_group, n.created_at,
           (SELECT COUNT(*) FROM email_outbox o WHERE o.notification_id = n.id) AS queued
         FROM notifications n
         ORDER BY n.created_at DESC",
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
                "workshopGroup": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "queuedEmails": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_outbox_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "outbox": [] }));
    };

    let notification_id = req
        .params
        .get("notificationId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "notificationId": r.get::<_, String>(1)?,
            "studentId": r.get::<_, String>(2)?,
            "recipient": r.get::<_, String>(3)?,
            "status": r.get::<_, String>(4)?,
            "queuedAt": r.get::<_, String>(5)?
        }))
    };

    let rows = if let Some(ref nid) = notification_id {
        conn.prepare(
            "SELECT id, notification_id, student_id, recipient, status, queued_at
             FROM email_outbox WHERE notification_id = ?
             ORDER BY queued_at, recipient",
        )
        .and_then(|mut stmt| {
            stmt.query_map([nid], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        conn.prepare(
            "SELECT id, notification_id, student_id, recipient, status, queued_at
             FROM email_outbox
             ORDER BY queued_at, recipient",
        )
        .and_then(|mut stmt| {
            stmt.query_map([], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(outbox) => ok(&req.id, json!({ "outbox": outbox })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.create" => Some(handle_notifications_create(state, req)),
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "outbox.list" => Some(handle_outbox_list(state, req)),
        _ => None,
    }
}
