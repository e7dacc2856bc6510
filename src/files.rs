//! Workspace-local object store for uploaded files.
//!
//! Mirrors the hosted bucket's contract: write-by-path with no overwrite,
//! declared content type and cache-control recorded alongside the object,
//! and a derivable public URL per path.

use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_PUBLIC_BASE: &str = "app://uploads";

pub struct FileStore {
    root: PathBuf,
    public_base: String,
}

impl FileStore {
    pub fn open(workspace: &Path, public_base: Option<String>) -> anyhow::Result<Self> {
        let root = workspace.join("uploads");
        std::fs::create_dir_all(&root)?;
        let public_base = public_base
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE.to_string());
        Ok(Self { root, public_base })
    }

    /// Writes an object at `rel_path`. Fails if the path already exists.
    pub fn upload(
        &self,
        rel_path: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> anyhow::Result<()> {
        let dest = self.root.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(&dest)?;
        file.write_all(bytes)?;

        // Header metadata the bucket would keep server-side.
        let meta = json!({
            "contentType": content_type,
            "cacheControl": cache_control,
        });
        let meta_path = dest.with_extension(format!(
            "{}.meta.json",
            dest.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));
        std::fs::write(meta_path, serde_json::to_vec_pretty(&meta)?)?;
        Ok(())
    }

    pub fn public_url(&self, rel_path: &str) -> String {
        format!("{}/{}", self.public_base, rel_path)
    }

    pub fn object_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }
}
