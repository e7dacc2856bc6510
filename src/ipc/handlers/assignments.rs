use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SUBMISSION_STYLES: &[&str] = &["file_upload", "external_link", "in_person"];

struct AssignmentFields {
    title: String,
    description: String,
    submission_deadline: String,
    submission_style: String,
}

fn validate_fields(params: &serde_json::Value) -> Result<AssignmentFields, serde_json::Value> {
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
    if description.is_empty() || description.chars().count() > 500 {
        fields.insert(
            "description".into(),
            json!("description must be 1-500 characters"),
        );
    }

    let submission_deadline = params
        .get("submissionDeadline")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if NaiveDate::parse_from_str(&submission_deadline, "%Y-%m-%d").is_err() {
        fields.insert(
            "submissionDeadline".into(),
            json!("submissionDeadline must be a YYYY-MM-DD date"),
        );
    }

    let submission_style = params
        .get("submissionStyle")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if !SUBMISSION_STYLES.contains(&submission_style.as_str()) {
        fields.insert(
            "submissionStyle".into(),
            json!(format!(
                "submissionStyle must be one of: {}",
                SUBMISSION_STYLES.join(", ")
            )),
        );
    }

    if !fields.is_empty() {
        return Err(json!({ "fields": fields }));
    }
    Ok(AssignmentFields {
        title,
        description,
        submission_deadline,
        submission_style,
    })
}

/// Keeps workshops.has_assignment in step. Denormalized and best-effort:
/// a failure here is logged, not surfaced.
fn set_assignment_flag(conn: &Connection, workshop_id: &str, value: bool) {
    let flag = i64::from(value);
    if let Err(e) = conn.execute(
        "UPDATE workshops SET has_assignment = ? WHERE id = ?",
        (flag, workshop_id),
    ) {
        eprintln!(
            "has_assignment flag update failed for workshop {}: {}",
            workshop_id, e
        );
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let workshop_id = match req.params.get("workshopId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing workshopId", None),
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

    let workshop_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM workshops WHERE id = ?", [&workshop_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if workshop_exists.is_none() {
        return err(&req.id, "not_found", "workshop not found", None);
    }

    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM assignments WHERE workshop_id = ?",
            [&workshop_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return err(
            &req.id,
            "assignment_exists",
            "workshop already has an assignment",
            None,
        );
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, workshop_id, title, description, submission_deadline, submission_style)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &workshop_id,
            &fields.title,
            &fields.description,
            &fields.submission_deadline,
            &fields.submission_style,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    set_assignment_flag(conn, &workshop_id, true);

    ok(
        &req.id,
        json!({ "assignmentId": assignment_id, "workshopId": workshop_id }),
    )
}

fn handle_assignments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
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
        "UPDATE assignments
         SET title = ?, description = ?, submission_deadline = ?, submission_style = ?
         WHERE id = ?",
        (
            &fields.title,
            &fields.description,
            &fields.submission_deadline,
            &fields.submission_style,
            &assignment_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "assignment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };

    let workshop_id: Option<String> = match conn
        .query_row(
            "SELECT workshop_id FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(workshop_id) = workshop_id else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    if let Err(e) = conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    set_assignment_flag(conn, &workshop_id, false);

    ok(&req.id, json!({ "ok": true }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "assignments": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.workshop_id, w.title, a.title, a.description, a.submission_deadline, a.submission_style
         FROM assignments a
         JOIN workshops w ON w.id = a.workshop_id
         ORDER BY a.submission_deadline, a.title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "workshopId": r.get::<_, String>(1)?,
                "workshopTitle": r.get::<_, String>(2)?,
                "title": r.get::<_, String>(3)?,
                "description": r.get::<_, String>(4)?,
                "submissionDeadline": r.get::<_, String>(5)?,
                "submissionStyle": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.update" => Some(handle_assignments_update(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}
