use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::blocks::{extract_blocks, BlockSet};
use crate::error::{BreathlessError, Result};

pub const SUCCESS_MARKER: &str = "[success]";
pub const FAILURE_MARKER: &str = "[failure]";
/// Separates the feedback headline from the tool output payload.
pub const FEEDBACK_SEPARATOR: &str = ":\n";

/// A capability that consumes fenced blocks of one tag.
///
/// Tools never fail with an error: failures are reported as text and
/// classified by [`Tool::check_failure`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Fence tag the model uses to address this tool.
    fn tag(&self) -> &str;

    fn description(&self) -> &str;

    /// Run every block in order and return the combined textual output.
    async fn execute(&self, blocks: &[String]) -> String;

    fn check_failure(&self, output: &str) -> bool;

    /// Headline placed between the marker and the separator.
    fn feedback_label(&self, success: bool) -> String {
        if success {
            format!("{} succeeded", self.name())
        } else {
            format!("{} failed", self.name())
        }
    }

    /// Wrap `output` with the `[success]`/`[failure]` marker.
    fn interpreter_feedback(&self, output: &str) -> String {
        let success = !self.check_failure(output);
        format_feedback(&self.feedback_label(success), success, output)
    }
}

pub fn format_feedback(label: &str, success: bool, output: &str) -> String {
    let marker = if success { SUCCESS_MARKER } else { FAILURE_MARKER };
    format!("{marker} {label}{FEEDBACK_SEPARATOR}{output}")
}

/// Payload after the first separator of a `[success]` feedback message.
pub fn success_payload(feedback: &str) -> Option<&str> {
    if !feedback.starts_with(SUCCESS_MARKER) {
        return None;
    }
    Some(
        feedback
            .split_once(FEEDBACK_SEPARATOR)
            .map(|(_, payload)| payload)
            .unwrap_or(feedback),
    )
}

/// Outcome of running one tool over its blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecutionResult {
    pub raw_output: String,
    pub success: bool,
    pub feedback_message: String,
}

pub async fn run_tool(tool: &dyn Tool, blocks: &[String]) -> ToolExecutionResult {
    let raw_output = tool.execute(blocks).await;
    let success = !tool.check_failure(&raw_output);
    let feedback_message = tool.interpreter_feedback(&raw_output);
    ToolExecutionResult {
        raw_output,
        success,
        feedback_message,
    }
}

/// Ordered tool list. Registration order is the execution priority.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool, replacing any previous tool with the same name in place.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| BreathlessError::ToolNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> + '_ {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Blocks addressed to each tool, in registration order. Tools whose tag
    /// never appears or whose blocks are all unterminated are skipped.
    pub fn blocks_for<'a>(&'a self, text: &str) -> Vec<(&'a Arc<dyn Tool>, BlockSet)> {
        self.tools
            .iter()
            .filter_map(|tool| {
                extract_blocks(text, tool.tag())
                    .filter(|set| !set.is_empty())
                    .map(|set| (tool, set))
            })
            .collect()
    }
}

/// Resolve `save_path` under `work_dir`, refusing absolute or escaping paths.
pub fn resolve_save_path(work_dir: &Path, save_path: &str) -> Result<PathBuf> {
    let relative = Path::new(save_path.trim());
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if save_path.trim().is_empty() || escapes {
        return Err(BreathlessError::Protocol(format!(
            "refusing to save blocks outside the working directory: `{save_path}`"
        )));
    }
    Ok(work_dir.join(relative))
}

/// Persist block contents, joined by newlines, to `save_path` under `work_dir`.
pub async fn save_blocks(work_dir: &Path, save_path: &str, blocks: &[String]) -> Result<PathBuf> {
    let target = resolve_save_path(work_dir, save_path)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, blocks.join("\n")).await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn tag(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases each block"
        }

        async fn execute(&self, blocks: &[String]) -> String {
            blocks.iter().map(|b| b.to_uppercase()).collect::<Vec<_>>().join("\n")
        }

        fn check_failure(&self, output: &str) -> bool {
            output.contains("FAIL")
        }
    }

    #[test]
    fn feedback_marker_is_stable() {
        let tool = UpperTool;
        let first = tool.interpreter_feedback("ALL GOOD");
        let second = tool.interpreter_feedback("ALL GOOD");
        assert!(first.starts_with(SUCCESS_MARKER));
        assert_eq!(first, second);
        assert!(tool.interpreter_feedback("FAIL").starts_with(FAILURE_MARKER));
    }

    #[test]
    fn payload_follows_first_separator() {
        let feedback = format_feedback("bash succeeded", true, "line one:\nline two");
        assert_eq!(success_payload(&feedback), Some("line one:\nline two"));
        assert_eq!(success_payload(&format_feedback("bash failed", false, "x")), None);
    }

    #[tokio::test]
    async fn run_tool_classifies_output() {
        let result = run_tool(&UpperTool, &["ok".to_string()]).await;
        assert_eq!(result.raw_output, "OK");
        assert!(result.success);

        let result = run_tool(&UpperTool, &["fail".to_string()]).await;
        assert!(!result.success);
        assert!(result.feedback_message.starts_with(FAILURE_MARKER));
    }

    #[test]
    fn registry_keeps_registration_order() {
        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn tag(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                ""
            }
            async fn execute(&self, _blocks: &[String]) -> String {
                String::new()
            }
            fn check_failure(&self, _output: &str) -> bool {
                false
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Named("zeta"));
        registry.register(Named("alpha"));
        registry.register(Named("zeta"));
        assert_eq!(registry.names(), vec!["zeta", "alpha"]);
        assert!(registry.require("missing").is_err());

        let text = "```alpha\none\n```\n```zeta\ntwo\n```";
        let order: Vec<&str> = registry
            .blocks_for(text)
            .into_iter()
            .map(|(tool, _)| tool.name())
            .collect();
        assert_eq!(order, vec!["zeta", "alpha"]);
    }

    #[test]
    fn save_path_must_stay_inside_work_dir() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_save_path(root, "scans/light.txt").unwrap(),
            PathBuf::from("/work/scans/light.txt")
        );
        assert!(resolve_save_path(root, "../etc/passwd").is_err());
        assert!(resolve_save_path(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn saves_blocks_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_blocks(dir.path(), "notes/run.sh", &["ls".into(), "id".into()])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "ls\nid");
    }
}
