use crate::groups::WorkshopGroup;
use crate::ipc::error::{err, flow_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::workshops::{
    create_workshop, update_workshop, SqliteStore, StoreUploader, WorkshopForm, WorkshopRow,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn workshop_json(row: &WorkshopRow, class_ids: &[String]) -> serde_json::Value {
    json!({
        "id": row.id,
        "title": row.title,
        "description": row.description,
        "workshopDate": row.workshop_date,
        "presentationUrl": row.presentation_url,
        "hasAssignment": row.has_assignment,
        "classIds": class_ids
    })
}

fn parse_group(params: &serde_json::Value) -> Result<WorkshopGroup, serde_json::Value> {
    let raw = params
        .get("workshopGroup")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if raw.is_empty() {
        return Err(json!({ "code": "bad_params", "message": "missing workshopGroup" }));
    }
    WorkshopGroup::parse(raw).ok_or_else(|| {
        json!({
            "code": "unknown_group",
            "message": format!("unknown workshop group: {}", raw)
        })
    })
}

fn group_err(id: &str, e: serde_json::Value) -> serde_json::Value {
    let code = e.get("code").and_then(|v| v.as_str()).unwrap_or("internal");
    let message = e.get("message").and_then(|v| v.as_str()).unwrap_or("");
    err(id, code, message, None)
}

fn handle_workshops_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(files)) = (state.db.as_ref(), state.files.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group = match parse_group(&req.params) {
        Ok(g) => g,
        Err(e) => return group_err(&req.id, e),
    };
    let form = match WorkshopForm::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return flow_err(&req.id, e),
    };

    let mut store = SqliteStore::new(conn);
    let mut uploader = StoreUploader::new(files);
    match create_workshop(&mut store, &mut uploader, &form, group) {
        Ok(out) => ok(
            &req.id,
            json!({ "workshop": workshop_json(&out.workshop, &out.class_ids) }),
        ),
        Err(e) => flow_err(&req.id, e),
    }
}

fn handle_workshops_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(files)) = (state.db.as_ref(), state.files.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let workshop_id = match req.params.get("workshopId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing workshopId", None),
    };
    let group = match parse_group(&req.params) {
        Ok(g) => g,
        Err(e) => return group_err(&req.id, e),
    };
    let form = match WorkshopForm::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return flow_err(&req.id, e),
    };

    let mut store = SqliteStore::new(conn);
    let mut uploader = StoreUploader::new(files);
    match update_workshop(&mut store, &mut uploader, &workshop_id, &form, group) {
        Ok(out) => ok(
            &req.id,
            json!({ "workshop": workshop_json(&out.workshop, &out.class_ids) }),
        ),
        Err(e) => flow_err(&req.id, e),
    }
}

fn linked_class_names(conn: &Connection, workshop_id: &str) -> Result<Vec<String>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT c.name
             FROM workshop_classes wc
             JOIN crc_classes c ON c.id = wc.class_id
             WHERE wc.workshop_id = ?
             ORDER BY c.name",
        )
        .map_err(|e| e.to_string())?;
    stmt.query_map([workshop_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())
}

fn handle_workshops_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "workshops": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, description, workshop_date, presentation_url, has_assignment
         FROM workshops
         ORDER BY workshop_date DESC, title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut workshops = Vec::new();
    for (id, title, description, date, url, has_assignment) in rows {
        let class_names = match linked_class_names(conn, &id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        };
        workshops.push(json!({
            "id": id,
            "title": title,
            "description": description,
            "workshopDate": date,
            "presentationUrl": url,
            "hasAssignment": has_assignment != 0,
            "classNames": class_names
        }));
    }

    ok(&req.id, json!({ "workshops": workshops }))
}

fn handle_workshops_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let workshop_id = match req.params.get("workshopId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing workshopId", None),
    };

    let row = conn
        .query_row(
            "SELECT id, title, description, workshop_date, presentation_url, has_assignment
             FROM workshops WHERE id = ?",
            [&workshop_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, String>(2)?,
                    "workshopDate": r.get::<_, String>(3)?,
                    "presentationUrl": r.get::<_, Option<String>>(4)?,
                    "hasAssignment": r.get::<_, i64>(5)? != 0
                }))
            },
        )
        .optional();
    let mut workshop = match row {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "workshop not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let class_names = match linked_class_names(conn, &workshop_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    workshop["classNames"] = json!(class_names);

    ok(&req.id, json!({ "workshop": workshop }))
}

fn handle_workshops_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let workshop_id = match req.params.get("workshopId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing workshopId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM workshops WHERE id = ?", [&workshop_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "workshop not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order: no ON DELETE CASCADE in the schema.
    if let Err(e) = tx.execute("DELETE FROM assignments WHERE workshop_id = ?", [&workshop_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM workshop_classes WHERE workshop_id = ?",
        [&workshop_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "workshop_classes" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM workshops WHERE id = ?", [&workshop_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "workshops" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workshops.create" => Some(handle_workshops_create(state, req)),
        "workshops.update" => Some(handle_workshops_update(state, req)),
        "workshops.list" => Some(handle_workshops_list(state, req)),
        "workshops.get" => Some(handle_workshops_get(state, req)),
        "workshops.delete" => Some(handle_workshops_delete(state, req)),
        _ => None,
    }
}
