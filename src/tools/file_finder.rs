//! Structured file lookup tool.
//!
//! Blocks carry `key=value` lines: `name=<fragment>` (required) and
//! `action=read|info` (default `info`). The first file under the working
//! directory whose name contains the fragment, case-insensitively, is used.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::blocks::parameter_value;
use crate::tool::Tool;

pub const FILE_FINDER_TAG: &str = "file_finder";

const EXCLUDED_SUFFIXES: &[&str] = &[".pyc", ".o", ".so", ".a", ".lib", ".dll", ".dylib"];

const UNSUPPORTED_MEDIA: &str =
    "Can't read file type: image, video, or audio files are not supported.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Info,
    Read,
}

impl Action {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("read") => Action::Read,
            _ => Action::Info,
        }
    }
}

pub struct FileFinderTool {
    work_dir: PathBuf,
}

impl FileFinderTool {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

/// Walk `root` depth-first in name order and return the first matching file.
/// Hidden entries and compiled artefacts are skipped.
pub fn find_file(root: &Path, fragment: &str) -> Option<PathBuf> {
    let needle = fragment.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            !EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
                && name.contains(&needle)
        })
        .map(|entry| entry.into_path())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// MIME-style type guessed from the extension, `Unknown` otherwise.
pub fn file_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" | "cfg" | "conf" | "ini" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "xml" => "text/xml",
        "py" => "text/x-python",
        "sh" => "application/x-sh",
        "rs" => "text/rust",
        "js" => "text/javascript",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "Unknown",
    }
}

fn is_media(kind: &str) -> bool {
    kind.starts_with("image/") || kind.starts_with("video/") || kind.starts_with("audio/")
}

fn describe(path: &Path, action: Action) -> String {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = file_type(path);
    match action {
        Action::Info => format!(
            "File: {filename}, found at {}, File type: {kind}",
            path.display()
        ),
        Action::Read if is_media(kind) => format!("Content of {filename}:\n{UNSUPPORTED_MEDIA}"),
        Action::Read => match std::fs::read(path) {
            Ok(bytes) => format!(
                "Content of {filename}:\n{}",
                String::from_utf8_lossy(&bytes)
            ),
            Err(e) => format!("File: {filename} - Error reading file: {e}"),
        },
    }
}

fn lookup(root: &Path, block: &str) -> String {
    let Some(name) = parameter_value(block, "name").filter(|n| !n.is_empty()) else {
        return "Error: No filename provided".to_string();
    };
    let action = Action::parse(parameter_value(block, "action"));
    match find_file(root, name) {
        Some(path) => describe(&path, action),
        None => format!("File: {name} - not found"),
    }
}

#[async_trait]
impl Tool for FileFinderTool {
    fn name(&self) -> &str {
        "file_finder"
    }

    fn tag(&self) -> &str {
        FILE_FINDER_TAG
    }

    fn description(&self) -> &str {
        "Find a file in the working directory and report its location or content. \
         Blocks take `action=read|info` and `name=<filename>`."
    }

    async fn execute(&self, blocks: &[String]) -> String {
        if blocks.is_empty() {
            return "Error: No valid blocks provided".to_string();
        }
        let root = self.work_dir.clone();
        let blocks = blocks.to_vec();
        let joined = tokio::task::spawn_blocking(move || {
            blocks
                .iter()
                .map(|block| {
                    let mut line = lookup(&root, block);
                    line.push('\n');
                    line
                })
                .collect::<String>()
        })
        .await;
        match joined {
            Ok(output) => output.trim().to_string(),
            Err(e) => format!("Error: file search aborted: {e}"),
        }
    }

    fn check_failure(&self, output: &str) -> bool {
        output.is_empty() || output.contains("Error") || output.contains("not found")
    }

    fn feedback_label(&self, success: bool) -> String {
        if success {
            "File Finder successful".to_string()
        } else {
            "File Finder failed".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("report.txt"), "hello").unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("nested/deeper/Notes.MD"), "# notes").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/secret-notes.md"), "hidden").unwrap();
        fs::write(dir.path().join("module.pyc"), [0u8, 1, 2]).unwrap();
        fs::write(dir.path().join("photo.png"), [137u8, 80, 78, 71]).unwrap();
        dir
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = fixture();
        let tool = FileFinderTool::new(dir.path());
        let output = tool
            .execute(&["action=read\nname=report.txt".to_string()])
            .await;
        assert!(output.contains("Content of report.txt:\nhello"));
        assert!(!tool.check_failure(&output));
    }

    #[tokio::test]
    async fn info_is_default_action() {
        let dir = fixture();
        let tool = FileFinderTool::new(dir.path());
        let output = tool.execute(&["name=notes".to_string()]).await;
        assert!(output.starts_with("File: Notes.MD, found at "));
        assert!(output.contains("nested"));
        assert!(output.ends_with("File type: text/plain"));
    }

    #[tokio::test]
    async fn hidden_and_compiled_files_are_skipped() {
        let dir = fixture();
        let tool = FileFinderTool::new(dir.path());
        assert_eq!(
            tool.execute(&["name=secret".to_string()]).await,
            "File: secret - not found"
        );
        let output = tool.execute(&["name=module".to_string()]).await;
        assert!(tool.check_failure(&output));
    }

    #[tokio::test]
    async fn media_files_are_not_read() {
        let dir = fixture();
        let tool = FileFinderTool::new(dir.path());
        let output = tool
            .execute(&["action=read\nname=photo.png".to_string()])
            .await;
        assert!(output.ends_with(UNSUPPORTED_MEDIA));
    }

    #[tokio::test]
    async fn missing_name_fails() {
        let dir = fixture();
        let tool = FileFinderTool::new(dir.path());
        let output = tool.execute(&["action=read".to_string()]).await;
        assert_eq!(output, "Error: No filename provided");
        assert!(tool.check_failure(&output));
        assert!(tool
            .interpreter_feedback(&output)
            .starts_with("[failure] File Finder failed:\n"));
    }
}
