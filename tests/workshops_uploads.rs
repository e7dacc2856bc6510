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

fn uploads_entries(workspace: &PathBuf) -> Vec<PathBuf> {
    let uploads = workspace.join("uploads");
    if !uploads.exists() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut stack = vec![uploads];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).expect("read uploads dir") {
            let entry = entry.expect("dir entry");
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[test]
fn pdf_upload_stores_object_and_derives_public_url() {
    let workspace = temp_dir("crcadmin-upload-pdf");
    let deck = workspace.join("deck.pdf");
    std::fs::write(&deck, b"%PDF-1.4 sample deck").expect("write source file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({
            "path": workspace.to_string_lossy(),
            "publicBaseUrl": "https://cdn.example.org/crc"
        }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "classes.sync", json!({}));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workshops.create",
        json!({
            "title": "Resume Deck",
            "description": "Slides for the resume workshop",
            "workshopDate": "2026-09-15",
            "workshopGroup": "senior_6_group_c",
            "presentationFile": {
                "path": deck.to_string_lossy(),
                "contentType": "application/pdf"
            }
        }),
    );

    let url = created
        .get("workshop")
        .and_then(|w| w.get("presentationUrl"))
        .and_then(|v| v.as_str())
        .expect("presentation url");
    assert!(url.starts_with("https://cdn.example.org/crc/workshops/Resume_Deck_"));
    assert!(url.ends_with(".pdf"));

    let stored: Vec<PathBuf> = uploads_entries(&workspace)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("pdf"))
        .collect();
    assert_eq!(stored.len(), 1, "exactly one object uploaded");
    let bytes = std::fs::read(&stored[0]).expect("read stored object");
    assert_eq!(bytes, b"%PDF-1.4 sample deck");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_pdf_content_type_is_rejected_before_any_storage_write() {
    let workspace = temp_dir("crcadmin-upload-nonpdf");
    let deck = workspace.join("deck.pptx");
    std::fs::write(&deck, b"not a pdf").expect("write source file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "classes.sync", json!({}));

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "workshops.create",
        json!({
            "title": "Slides",
            "description": "Deck in the wrong format",
            "workshopDate": "2026-09-15",
            "workshopGroup": "senior_6_group_c",
            "presentationFile": {
                "path": deck.to_string_lossy(),
                "contentType": "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }),
    );
    assert_eq!(failed.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        failed
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    let fields = failed
        .get("error")
        .and_then(|e| e.get("details"))
        .and_then(|d| d.get("fields"))
        .and_then(|f| f.as_object())
        .expect("field map");
    assert!(fields.contains_key("presentationFile"));

    assert!(
        uploads_entries(&workspace).is_empty(),
        "no object-store writes for a rejected file"
    );
    let listed = request_ok(&mut stdin, &mut reader, "4", "workshops.list", json!({}));
    assert_eq!(
        listed
            .get("workshops")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn url_and_file_together_are_rejected() {
    let workspace = temp_dir("crcadmin-upload-xor");
    let deck = workspace.join("deck.pdf");
    std::fs::write(&deck, b"%PDF-1.4").expect("write source file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "classes.sync", json!({}));

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "workshops.create",
        json!({
            "title": "Slides",
            "description": "Both sources at once",
            "workshopDate": "2026-09-15",
            "workshopGroup": "senior_6_group_c",
            "presentationUrl": "https://example.org/deck.pdf",
            "presentationFile": {
                "path": deck.to_string_lossy(),
                "contentType": "application/pdf"
            }
        }),
    );
    assert_eq!(
        failed
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    assert!(uploads_entries(&workspace).is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}
