use crate::groups::{self, WorkshopGroup};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::workshops::{SqliteStore, WorkshopStore};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Student counts let the dashboard show audience sizes next to each class.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM crc_classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Upserts class records by name. CRC classes are externally owned; this
/// refreshes the admin-side mirror, defaulting to the built-in roster.
fn handle_classes_sync(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let names: Vec<String> = match req.params.get("names") {
        None | Some(serde_json::Value::Null) => groups::roster_class_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect(),
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return err(&req.id, "bad_params", "names must be an array", None);
            };
            let mut out = Vec::new();
            for item in arr {
                let Some(name) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "names must be non-empty strings", None);
                };
                out.push(name.to_string());
            }
            out
        }
    };

    let mut inserted = 0usize;
    for name in &names {
        let class_id = Uuid::new_v4().to_string();
        match conn.execute(
            "INSERT OR IGNORE INTO crc_classes(id, name) VALUES(?, ?)",
            (&class_id, name),
        ) {
            Ok(n) => inserted += n,
            Err(e) => {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "crc_classes" })),
                )
            }
        }
    }

    ok(
        &req.id,
        json!({ "synced": names.len(), "inserted": inserted }),
    )
}

/// Lists every workshop group with its class names and the class ids
/// currently resolvable, so the UI can flag audiences with unsynced classes.
fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut store = SqliteStore::new(conn);
    let mut out = Vec::new();
    for group in WorkshopGroup::all() {
        let class_ids = match store.class_ids_by_name(group.class_names()) {
            Ok(ids) => ids,
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        };
        let resolvable = !class_ids.is_empty();
        out.push(json!({
            "group": group.as_str(),
            "classNames": group.class_names(),
            "classIds": class_ids,
            "resolvable": resolvable
        }));
    }

    ok(&req.id, json!({ "groups": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.sync" => Some(handle_classes_sync(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        _ => None,
    }
}
