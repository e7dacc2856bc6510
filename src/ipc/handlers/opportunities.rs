use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

struct OpportunityFields {
    title: String,
    description: String,
    link: String,
    deadline: String,
}

fn validate_fields(params: &serde_json::Value) -> Result<OpportunityFields, serde_json::Value> {
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
    if description.is_empty() || description.chars().count() > 1000 {
        fields.insert(
            "description".into(),
            json!("description must be 1-1000 characters"),
        );
    }

    let link = params
        .get("link")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if !(link.starts_with("http://") || link.starts_with("https://")) {
        fields.insert("link".into(), json!("link must be an http(s) URL"));
    }

    let deadline = params
        .get("deadline")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if NaiveDate::parse_from_str(&deadline, "%Y-%m-%d").is_err() {
        fields.insert("deadline".into(), json!("deadline must be a YYYY-MM-DD date"));
    }

    if !fields.is_empty() {
        return Err(json!({ "fields": fields }));
    }
    Ok(OpportunityFields {
        title,
        description,
        link,
        deadline,
    })
}

fn handle_opportunities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let opportunity_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO opportunities(id, title, description, link, deadline)
         VALUES(?, ?, ?, ?, ?)",
        (
            &opportunity_id,
            &fields.title,
            &fields.description,
            &fields.link,
            &fields.deadline,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "opportunities" })),
        );
    }

    ok(&req.id, json!({ "opportunityId": opportunity_id }))
}

fn handle_opportunities_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let opportunity_id = match req.params.get("opportunityId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing opportunityId", None),
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
        "UPDATE opportunities SET title = ?, description = ?, link = ?, deadline = ? WHERE id = ?",
        (
            &fields.title,
            &fields.description,
            &fields.link,
            &fields.deadline,
            &opportunity_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "opportunity not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_opportunities_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let opportunity_id = match req.params.get("opportunityId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing opportunityId", None),
    };

    let changed = match conn.execute("DELETE FROM opportunities WHERE id = ?", [&opportunity_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "opportunity not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_opportunities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "opportunities": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, description, link, deadline
         FROM opportunities
         ORDER BY deadline, title",
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
                "link": r.get::<_, String>(3)?,
                "deadline": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(opportunities) => ok(&req.id, json!({ "opportunities": opportunities })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "opportunities.create" => Some(handle_opportunities_create(state, req)),
        "opportunities.update" => Some(handle_opportunities_update(state, req)),
        "opportunities.delete" => Some(handle_opportunities_delete(state, req)),
        "opportunities.list" => Some(handle_opportunities_list(state, req)),
        _ => None,
    }
}
