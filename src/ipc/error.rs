use serde_json::json;

use crate::workshops::FlowError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn flow_err(id: &str, e: FlowError) -> serde_json::Value {
    let details = e.fields.map(|fields| json!({ "fields": fields }));
    err(id, e.code, e.message, details)
}
