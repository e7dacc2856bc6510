//! Workshop write flows: validation, class resolution, optional
//! presentation upload, row writes, and class linking.
//!
//! Create runs as an explicit step sequence and compensates a successful
//! row insert when the link insert fails (delete the just-created row, so
//! no workshop is left without an audience). Update swaps links inside a
//! single transaction instead, so a failed swap leaves the old links in
//! place rather than none at all.

use crate::files::FileStore;
use crate::groups::WorkshopGroup;
use chrono::{NaiveDate, Utc};
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const CACHE_CONTROL: &str = "max-age=3600";

#[derive(Debug, Clone)]
pub struct WorkshopRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub workshop_date: String,
    pub presentation_url: Option<String>,
    pub has_assignment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    None,
    Url(String),
    File { path: PathBuf, content_type: String },
}

#[derive(Debug, Clone)]
pub struct WorkshopForm {
    pub title: String,
    pub description: String,
    pub workshop_date: String,
    pub presentation: Presentation,
}

#[derive(Debug)]
pub struct FlowError {
    pub code: &'static str,
    pub message: String,
    pub fields: Option<serde_json::Map<String, serde_json::Value>>,
}

impl FlowError {
    fn validation(fields: Vec<(&'static str, String)>) -> Self {
        let mut map = serde_json::Map::new();
        for (k, v) in fields {
            map.insert(k.to_string(), json!(v));
        }
        Self {
            code: "validation_failed",
            message: "one or more fields are invalid".to_string(),
            fields: Some(map),
        }
    }

    fn plain(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: None,
        }
    }
}

/// Relational side of the flow, injected per request.
pub trait WorkshopStore {
    fn class_ids_by_name(&mut self, names: &[&str]) -> Result<Vec<String>, String>;
    fn insert_workshop(&mut self, row: &WorkshopRow) -> Result<(), String>;
    /// Returns false when no row matched the id.
    fn update_workshop(&mut self, row: &WorkshopRow) -> Result<bool, String>;
    fn delete_workshop(&mut self, workshop_id: &str) -> Result<(), String>;
    fn insert_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String>;
    /// Delete-then-insert of all links for the workshop, atomically.
    fn replace_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String>;
}

/// Object-store side of the flow.
pub trait PresentationUploader {
    /// Uploads the file at `source` and returns its public URL.
    fn upload_pdf(
        &mut self,
        rel_path: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<String, String>;
}

#[derive(Debug)]
pub struct FlowOutcome {
    pub workshop: WorkshopRow,
    pub class_ids: Vec<String>,
}

// Create steps, in order. Each step's failure terminates the flow; only a
// LINKING failure has anything to compensate.
enum CreateState {
    ResolvingClasses,
    WritingWorkshop { class_ids: Vec<String> },
    Linking { row: WorkshopRow, class_ids: Vec<String> },
}

impl WorkshopForm {
    /// Field-map validation. Collects every field error before failing, so
    /// the UI can mark all offending inputs at once.
    pub fn from_params(params: &serde_json::Value) -> Result<Self, FlowError> {
        let mut errors: Vec<(&'static str, String)> = Vec::new();

        let title = params
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if title.is_empty() || title.chars().count() > 100 {
            errors.push(("title", "title must be 1-100 characters".to_string()));
        }

        let description = params
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if description.is_empty() || description.chars().count() > 500 {
            errors.push((
                "description",
                "description must be 1-500 characters".to_string(),
            ));
        }

        let workshop_date = params
            .get("workshopDate")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if NaiveDate::parse_from_str(&workshop_date, "%Y-%m-%d").is_err() {
            errors.push((
                "workshopDate",
                "workshopDate must be a YYYY-MM-DD date".to_string(),
            ));
        }

        let url = params
            .get("presentationUrl")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let file = match params.get("presentationFile") {
            None | Some(serde_json::Value::Null) => None,
            Some(obj) => {
                let path = obj.get("path").and_then(|v| v.as_str());
                let content_type = obj.get("contentType").and_then(|v| v.as_str());
                match (path, content_type) {
                    (Some(p), Some(ct)) => Some((PathBuf::from(p), ct.to_string())),
                    _ => {
                        errors.push((
                            "presentationFile",
                            "presentationFile needs path and contentType".to_string(),
                        ));
                        None
                    }
                }
            }
        };

        let presentation = match (url, file) {
            (Some(_), Some(_)) => {
                errors.push((
                    "presentationFile",
                    "provide a presentation URL or a file, not both".to_string(),
                ));
                Presentation::None
            }
            (Some(u), None) => Presentation::Url(u),
            (None, Some((path, content_type))) => {
                // Declared MIME type only; no content sniffing.
                if !content_type.to_ascii_lowercase().contains("pdf") {
                    errors.push((
                        "presentationFile",
                        format!("unsupported file type: {}", content_type),
                    ));
                    Presentation::None
                } else {
                    Presentation::File { path, content_type }
                }
            }
            (None, None) => Presentation::None,
        };

        if !errors.is_empty() {
            return Err(FlowError::validation(errors));
        }

        Ok(Self {
            title,
            description,
            workshop_date,
            presentation,
        })
    }
}

/// Upload path segment: sanitized title, UTC date, random id. Collision
/// resistant, so a retried create never trips the no-overwrite rule.
pub fn upload_rel_path(title: &str, today: NaiveDate, id: Uuid) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("workshops/{}_{}_{}.pdf", sanitized, today.format("%Y-%m-%d"), id)
}

fn resolve_presentation_url(
    uploader: &mut dyn PresentationUploader,
    title: &str,
    presentation: &Presentation,
) -> Result<Option<String>, FlowError> {
    match presentation {
        Presentation::None => Ok(None),
        Presentation::Url(u) => Ok(Some(u.clone())),
        Presentation::File { path, content_type } => {
            let rel = upload_rel_path(title, Utc::now().date_naive(), Uuid::new_v4());
            uploader
                .upload_pdf(&rel, path, content_type)
                .map(Some)
                .map_err(|e| FlowError::plain("upload_failed", e))
        }
    }
}

fn resolve_class_ids(
    store: &mut dyn WorkshopStore,
    group: WorkshopGroup,
) -> Result<Vec<String>, FlowError> {
    let names = group.class_names();
    let ids = store
        .class_ids_by_name(names)
        .map_err(|e| FlowError::plain("db_query_failed", e))?;
    if ids.is_empty() {
        return Err(FlowError::plain(
            "no_matching_classes",
            format!("no CRC class records found for group {}", group.as_str()),
        ));
    }
    Ok(ids)
}

pub fn create_workshop(
    store: &mut dyn WorkshopStore,
    uploader: &mut dyn PresentationUploader,
    form: &WorkshopForm,
    group: WorkshopGroup,
) -> Result<FlowOutcome, FlowError> {
    let mut state = CreateState::ResolvingClasses;
    loop {
        state = match state {
            CreateState::ResolvingClasses => {
                let class_ids = resolve_class_ids(store, group)?;
                CreateState::WritingWorkshop { class_ids }
            }
            CreateState::WritingWorkshop { class_ids } => {
                let presentation_url =
                    resolve_presentation_url(uploader, &form.title, &form.presentation)?;
                let row = WorkshopRow {
                    id: Uuid::new_v4().to_string(),
                    title: form.title.clone(),
                    description: form.description.clone(),
                    workshop_date: form.workshop_date.clone(),
                    presentation_url,
                    has_assignment: false,
                };
                store
                    .insert_workshop(&row)
                    .map_err(|e| FlowError::plain("db_insert_failed", e))?;
                CreateState::Linking { row, class_ids }
            }
            CreateState::Linking { row, class_ids } => {
                if let Err(link_err) = store.insert_links(&row.id, &class_ids) {
                    // Best-effort compensation: remove the unlinked row so
                    // no workshop exists without an audience. Its own
                    // failure must not mask the link error.
                    if let Err(del_err) = store.delete_workshop(&row.id) {
                        eprintln!(
                            "compensating delete failed for workshop {}: {}",
                            row.id, del_err
                        );
                    }
                    return Err(FlowError::plain("db_link_failed", link_err));
                }
                return Ok(FlowOutcome {
                    workshop: row,
                    class_ids,
                });
            }
        };
    }
}

pub fn update_workshop(
    store: &mut dyn WorkshopStore,
    uploader: &mut dyn PresentationUploader,
    workshop_id: &str,
    form: &WorkshopForm,
    group: WorkshopGroup,
) -> Result<FlowOutcome, FlowError> {
    let class_ids = resolve_class_ids(store, group)?;
    let presentation_url = resolve_presentation_url(uploader, &form.title, &form.presentation)?;

    let row = WorkshopRow {
        id: workshop_id.to_string(),
        title: form.title.clone(),
        description: form.description.clone(),
        workshop_date: form.workshop_date.clone(),
        presentation_url,
        has_assignment: false, // not written by update, see SqliteStore
    };
    let matched = store
        .update_workshop(&row)
        .map_err(|e| FlowError::plain("db_update_failed", e))?;
    if !matched {
        return Err(FlowError::plain("not_found", "workshop not found"));
    }

    // Atomic swap; on failure the previous links survive intact.
    store
        .replace_links(workshop_id, &class_ids)
        .map_err(|e| FlowError::plain("db_link_failed", e))?;

    Ok(FlowOutcome {
        workshop: row,
        class_ids,
    })
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl WorkshopStore for SqliteStore<'_> {
    fn class_ids_by_name(&mut self, names: &[&str]) -> Result<Vec<String>, String> {
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT id FROM crc_classes WHERE name IN ({}) ORDER BY name",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| e.to_string())?;
        stmt.query_map(params_from_iter(names.iter()), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| e.to_string())
    }

    fn insert_workshop(&mut self, row: &WorkshopRow) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO workshops(id, title, description, workshop_date, presentation_url, has_assignment)
                 VALUES(?, ?, ?, ?, ?, 0)",
                (
                    &row.id,
                    &row.title,
                    &row.description,
                    &row.workshop_date,
                    &row.presentation_url,
                ),
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn update_workshop(&mut self, row: &WorkshopRow) -> Result<bool, String> {
        // has_assignment is owned by the assignments handlers; leave it alone.
        self.conn
            .execute(
                "UPDATE workshops
                 SET title = ?, description = ?, workshop_date = ?, presentation_url = ?
                 WHERE id = ?",
                (
                    &row.title,
                    &row.description,
                    &row.workshop_date,
                    &row.presentation_url,
                    &row.id,
                ),
            )
            .map(|n| n > 0)
            .map_err(|e| e.to_string())
    }

    fn delete_workshop(&mut self, workshop_id: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM workshops WHERE id = ?", [workshop_id])
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn insert_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String> {
        let tx = self.conn.unchecked_transaction().map_err(|e| e.to_string())?;
        for class_id in class_ids {
            if let Err(e) = tx.execute(
                "INSERT INTO workshop_classes(workshop_id, class_id) VALUES(?, ?)",
                (workshop_id, class_id),
            ) {
                let _ = tx.rollback();
                return Err(e.to_string());
            }
        }
        tx.commit().map_err(|e| e.to_string())
    }

    fn replace_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String> {
        let tx = self.conn.unchecked_transaction().map_err(|e| e.to_string())?;
        if let Err(e) = tx.execute(
            "DELETE FROM workshop_classes WHERE workshop_id = ?",
            [workshop_id],
        ) {
            let _ = tx.rollback();
            return Err(e.to_string());
        }
        for class_id in class_ids {
            if let Err(e) = tx.execute(
                "INSERT INTO workshop_classes(workshop_id, class_id) VALUES(?, ?)",
                (workshop_id, class_id),
            ) {
                let _ = tx.rollback();
                return Err(e.to_string());
            }
        }
        tx.commit().map_err(|e| e.to_string())
    }
}

pub struct StoreUploader<'a> {
    files: &'a FileStore,
}

impl<'a> StoreUploader<'a> {
    pub fn new(files: &'a FileStore) -> Self {
        Self { files }
    }
}

impl PresentationUploader for StoreUploader<'_> {
    fn upload_pdf(
        &mut self,
        rel_path: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<String, String> {
        let bytes = std::fs::read(source)
            .map_err(|e| format!("read {}: {}", source.display(), e))?;
        self.files
            .upload(rel_path, &bytes, content_type, CACHE_CONTROL)
            .map_err(|e| e.to_string())?;
        Ok(self.files.public_url(rel_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct MockStore {
        classes: Vec<(String, String)>, // (id, name)
        workshops: Vec<WorkshopRow>,
        links: Vec<(String, String)>, // (workshop_id, class_id)
        fail_link_insert: bool,
        fail_compensating_delete: bool,
        fail_link_replace: bool,
        insert_calls: usize,
        link_calls: usize,
    }

    impl MockStore {
        fn with_classes(names: &[&str]) -> Self {
            Self {
                classes: names
                    .iter()
                    .map(|n| (format!("class-{}", n), n.to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl WorkshopStore for MockStore {
        fn class_ids_by_name(&mut self, names: &[&str]) -> Result<Vec<String>, String> {
            Ok(self
                .classes
                .iter()
                .filter(|(_, name)| names.contains(&name.as_str()))
                .map(|(id, _)| id.clone())
                .collect())
        }

        fn insert_workshop(&mut self, row: &WorkshopRow) -> Result<(), String> {
            self.insert_calls += 1;
            self.workshops.push(row.clone());
            Ok(())
        }

        fn update_workshop(&mut self, row: &WorkshopRow) -> Result<bool, String> {
            match self.workshops.iter_mut().find(|w| w.id == row.id) {
                Some(w) => {
                    *w = row.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn delete_workshop(&mut self, workshop_id: &str) -> Result<(), String> {
            if self.fail_compensating_delete {
                return Err("forced delete failure".to_string());
            }
            self.workshops.retain(|w| w.id != workshop_id);
            Ok(())
        }

        fn insert_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String> {
            self.link_calls += 1;
            if self.fail_link_insert {
                return Err("forced link failure".to_string());
            }
            for c in class_ids {
                self.links.push((workshop_id.to_string(), c.clone()));
            }
            Ok(())
        }

        fn replace_links(&mut self, workshop_id: &str, class_ids: &[String]) -> Result<(), String> {
            if self.fail_link_replace {
                return Err("forced replace failure".to_string());
            }
            self.links.retain(|(w, _)| w != workshop_id);
            for c in class_ids {
                self.links.push((workshop_id.to_string(), c.clone()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockUploader {
        calls: usize,
        fail: bool,
    }

    impl PresentationUploader for MockUploader {
        fn upload_pdf(
            &mut self,
            rel_path: &str,
            _source: &Path,
            _content_type: &str,
        ) -> Result<String, String> {
            self.calls += 1;
            if self.fail {
                return Err("forced upload failure".to_string());
            }
            Ok(format!("app://uploads/{}", rel_path))
        }
    }

    fn valid_form() -> WorkshopForm {
        WorkshopForm {
            title: "Intro to Resumes".to_string(),
            description: "How to write a resume".to_string(),
            workshop_date: "2026-09-15".to_string(),
            presentation: Presentation::None,
        }
    }

    #[test]
    fn create_links_exactly_the_resolved_classes() {
        let mut store = MockStore::with_classes(&["S6 Group C", "S5 Group A"]);
        let mut uploader = MockUploader::default();
        let out = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect("create succeeds");

        assert_eq!(out.class_ids, vec!["class-S6 Group C".to_string()]);
        assert_eq!(store.workshops.len(), 1);
        assert_eq!(store.links.len(), 1);
        assert_eq!(store.links[0].1, "class-S6 Group C");
        assert_eq!(uploader.calls, 0);
    }

    #[test]
    fn create_fails_before_insert_when_no_classes_match() {
        let mut store = MockStore::with_classes(&[]);
        let mut uploader = MockUploader::default();
        let err = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect_err("must fail");

        assert_eq!(err.code, "no_matching_classes");
        assert_eq!(store.insert_calls, 0);
        assert_eq!(store.link_calls, 0);
        assert_eq!(uploader.calls, 0);
    }

    #[test]
    fn link_failure_compensates_with_a_delete() {
        let mut store = MockStore::with_classes(&["S6 Group C"]);
        store.fail_link_insert = true;
        let mut uploader = MockUploader::default();
        let err = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect_err("must fail");

        assert_eq!(err.code, "db_link_failed");
        assert_eq!(store.insert_calls, 1, "row was inserted before linking");
        assert!(store.workshops.is_empty(), "compensation removed the row");
        assert!(store.links.is_empty());
    }

    #[test]
    fn failed_compensating_delete_still_reports_the_link_error() {
        let mut store = MockStore::with_classes(&["S6 Group C"]);
        store.fail_link_insert = true;
        store.fail_compensating_delete = true;
        let mut uploader = MockUploader::default();
        let err = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect_err("must fail");

        assert_eq!(err.code, "db_link_failed");
        assert_eq!(store.workshops.len(), 1, "orphan survives when delete fails");
    }

    #[test]
    fn upload_failure_stops_before_row_insert() {
        let mut store = MockStore::with_classes(&["S6 Group C"]);
        let mut uploader = MockUploader {
            fail: true,
            ..MockUploader::default()
        };
        let mut form = valid_form();
        form.presentation = Presentation::File {
            path: PathBuf::from("/tmp/deck.pdf"),
            content_type: "application/pdf".to_string(),
        };
        let err = create_workshop(&mut store, &mut uploader, &form, WorkshopGroup::Senior6GroupC)
            .expect_err("must fail");

        assert_eq!(err.code, "upload_failed");
        assert_eq!(uploader.calls, 1);
        assert_eq!(store.insert_calls, 0);
    }

    #[test]
    fn update_swaps_links_without_residue() {
        let mut store = MockStore::with_classes(&["S5 Group A", "S5 Group B", "S6 Group C"]);
        let mut uploader = MockUploader::default();
        let out = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior5,
        )
        .expect("create");
        assert_eq!(out.class_ids.len(), 2);

        let updated = update_workshop(
            &mut store,
            &mut uploader,
            &out.workshop.id,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect("update");

        assert_eq!(updated.class_ids, vec!["class-S6 Group C".to_string()]);
        let remaining: Vec<&String> = store.links.iter().map(|(_, c)| c).collect();
        assert_eq!(remaining, vec!["class-S6 Group C"]);
    }

    #[test]
    fn update_of_missing_workshop_reports_not_found() {
        let mut store = MockStore::with_classes(&["S6 Group C"]);
        let mut uploader = MockUploader::default();
        let err = update_workshop(
            &mut store,
            &mut uploader,
            "nope",
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect_err("must fail");
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn failed_link_swap_keeps_old_links() {
        let mut store = MockStore::with_classes(&["S5 Group A", "S6 Group C"]);
        let mut uploader = MockUploader::default();
        let out = create_workshop(
            &mut store,
            &mut uploader,
            &valid_form(),
            WorkshopGroup::Senior5GroupA,
        )
        .expect("create");

        store.fail_link_replace = true;
        let err = update_workshop(
            &mut store,
            &mut uploader,
            &out.workshop.id,
            &valid_form(),
            WorkshopGroup::Senior6GroupC,
        )
        .expect_err("must fail");

        assert_eq!(err.code, "db_link_failed");
        assert_eq!(store.links.len(), 1);
        assert_eq!(store.links[0].1, "class-S5 Group A");
    }

    #[test]
    fn form_rejects_non_pdf_before_any_side_effect() {
        let params = json!({
            "title": "Slides",
            "description": "desc",
            "workshopDate": "2026-09-15",
            "presentationFile": { "path": "/tmp/deck.pptx", "contentType": "application/vnd.ms-powerpoint" }
        });
        let err = WorkshopForm::from_params(&params).expect_err("must fail");
        assert_eq!(err.code, "validation_failed");
        let fields = err.fields.expect("field map");
        assert!(fields.contains_key("presentationFile"));
    }

    #[test]
    fn form_rejects_url_and_file_together() {
        let params = json!({
            "title": "Slides",
            "description": "desc",
            "workshopDate": "2026-09-15",
            "presentationUrl": "https://example.org/deck.pdf",
            "presentationFile": { "path": "/tmp/deck.pdf", "contentType": "application/pdf" }
        });
        let err = WorkshopForm::from_params(&params).expect_err("must fail");
        assert_eq!(err.code, "validation_failed");
    }

    #[test]
    fn form_collects_every_field_error() {
        let params = json!({
            "title": "",
            "description": "",
            "workshopDate": "15/09/2026"
        });
        let err = WorkshopForm::from_params(&params).expect_err("must fail");
        let fields = err.fields.expect("field map");
        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("description"));
        assert!(fields.contains_key("workshopDate"));
    }

    #[test]
    fn form_keeps_literal_trimmed_url() {
        let params = json!({
            "title": "Slides",
            "description": "desc",
            "workshopDate": "2026-09-15",
            "presentationUrl": "  https://example.org/deck.pdf  "
        });
        let form = WorkshopForm::from_params(&params).expect("valid");
        assert_eq!(
            form.presentation,
            Presentation::Url("https://example.org/deck.pdf".to_string())
        );
    }

    #[test]
    fn upload_path_sanitizes_title() {
        let id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2026, 9, 15).expect("date");
        let rel = upload_rel_path("Intro to Resumes!", date, id);
        assert_eq!(
            rel,
            format!("workshops/Intro_to_Resumes__2026-09-15_{}.pdf", id)
        );
    }
}
