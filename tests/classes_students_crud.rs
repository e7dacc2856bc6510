use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_crcadmind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn crcadmind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn classes_sync_is_idempotent_and_groups_become_resolvable() {
    let workspace = temp_dir("crcadmin-classes-sync");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let before = request_ok(&mut stdin, &mut reader, "2", "groups.list", json!({}));
    let groups = before
        .get("groups")
        .and_then(|v| v.as_array())
        .expect("groups");
    assert!(groups
        .iter()
        .all(|g| g.get("resolvable").and_then(|v| v.as_bool()) == Some(false)));

    let first = request_ok(&mut stdin, &mut reader, "3", "classes.sync", json!({}));
    let inserted = first.get("inserted").and_then(|v| v.as_u64()).expect("count");
    assert!(inserted > 0);

    // Second sync upserts by name and inserts nothing new.
    let second = request_ok(&mut stdin, &mut reader, "4", "classes.sync", json!({}));
    assert_eq!(second.get("inserted").and_then(|v| v.as_u64()), Some(0));

    let after = request_ok(&mut stdin, &mut reader, "5", "groups.list", json!({}));
    let groups = after
        .get("groups")
        .and_then(|v| v.as_array())
        .expect("groups");
    assert!(groups
        .iter()
        .all(|g| g.get("resolvable").and_then(|v| v.as_bool()) == Some(true)));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_create_update_delete_round_trip() {
    let workspace = temp_dir("crcadmin-students-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.sync",
        json!({ "names": ["Entry Year"] }),
    );

    let classes = request_ok(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    let class_id = classes
        .get("classes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();

    let bad_email = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "classId": class_id,
            "lastName": "Park",
            "firstName": "Min",
            "email": "not-an-email"
        }),
    );
    assert_eq!(
        bad_email
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "classId": class_id,
            "lastName": "Park",
            "firstName": "Min",
            "email": "min.park@example.org"
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "firstName": "Min-jun", "active": false }
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("firstName").and_then(|v| v.as_str()),
        Some("Min-jun")
    );
    assert_eq!(students[0].get("active").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
