use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, String> {
    conn.query_row("SELECT 1 FROM crc_classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| e.to_string())
}

fn validate_email(params: &serde_json::Value) -> Result<Option<String>, &'static str> {
    match params.get("email") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let Some(raw) = v.as_str() else {
                return Err("email must be a string");
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if !trimmed.contains('@') {
                return Err("email must contain @");
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let email = match validate_email(&req.params) {
        Ok(v) => v,
        Err(msg) => {
            return err(
                &req.id,
                "validation_failed",
                "one or more fields are invalid",
                Some(json!({ "fields": { "email": msg } })),
            )
        }
    };
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, email, active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            &email,
            i64::from(active),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current = conn
        .query_row(
            "SELECT class_id, last_name, first_name, email, active FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional();
    let (mut class_id, mut last_name, mut first_name, mut email, mut active) = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(v) = patch.get("classId").and_then(|v| v.as_str()) {
        match class_exists(conn, v) {
            Ok(true) => class_id = v.to_string(),
            Ok(false) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        }
    }
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "lastName must not be empty", None);
        }
        last_name = v.trim().to_string();
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "firstName must not be empty", None);
        }
        first_name = v.trim().to_string();
    }
    if patch.contains_key("email") {
        email = match validate_email(&serde_json::Value::Object(patch.clone())) {
            Ok(v) => v,
            Err(msg) => {
                return err(
                    &req.id,
                    "validation_failed",
                    "one or more fields are invalid",
                    Some(json!({ "fields": { "email": msg } })),
                )
            }
        };
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        active = i64::from(v);
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET class_id = ?, last_name = ?, first_name = ?, email = ?, active = ?
         WHERE id = ?",
        (&class_id, &last_name, &first_name, &email, active, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM email_outbox WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "email_outbox" })),
        );
    }
    let changed = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if changed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let class_id = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "classId": r.get::<_, String>(1)?,
            "lastName": r.get::<_, String>(2)?,
            "firstName": r.get::<_, String>(3)?,
            "email": r.get::<_, Option<String>>(4)?,
            "active": r.get::<_, i64>(5)? != 0
        }))
    };

    let rows = if let Some(ref cid) = class_id {
        conn.prepare(
            "SELECT id, class_id, last_name, first_name, email, active
             FROM students WHERE class_id = ?
             ORDER BY last_name, first_name",
        )
        .and_then(|mut stmt| {
            stmt.query_map([cid], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        conn.prepare(
            "SELECT id, class_id, last_name, first_name, email, active
             FROM students
             ORDER BY last_name, first_name",
        )
        .and_then(|mut stmt| {
            stmt.query_map([], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
