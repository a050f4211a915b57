//! Shell command tool.
//!
//! Runs each `bash` block through `sh -c` inside the working directory, with a
//! timeout and a blocked-pattern safety list.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::tool::Tool;

pub const SHELL_TAG: &str = "bash";

/// Configuration for the shell tool
#[derive(Clone, Debug)]
pub struct ShellConfig {
    /// Directory commands run in
    pub work_dir: PathBuf,
    /// Command timeout in seconds
    pub timeout_secs: u64,
    /// Substrings that prevent a block from running
    pub blocked_commands: Vec<String>,
}

pub fn default_blocked_commands() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "rm -rf /*".into(),
        "mkfs".into(),
        "dd if=".into(),
        ":(){:|:&};:".into(), // fork bomb
    ]
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            timeout_secs: 30,
            blocked_commands: default_blocked_commands(),
        }
    }
}

pub struct ShellTool {
    config: ShellConfig,
}

impl ShellTool {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    async fn run_block(&self, command: &str) -> String {
        if let Some(blocked) = self
            .config
            .blocked_commands
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
        {
            tracing::warn!(pattern = %blocked, "refusing blocked shell command");
            return format!("Error: Command blocked for safety: contains '{blocked}'");
        }

        let mut cmd = shell_command(command);
        cmd.current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command, "running shell block");
        let output = match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Err(_) => {
                return format!(
                    "Error: Command timed out after {} seconds",
                    self.config.timeout_secs
                )
            }
            Ok(Err(e)) => return format!("Error: {e}"),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            result.push_str("\nError: ");
            result.push_str(&stderr);
        }
        if result.is_empty() {
            match output.status.code() {
                Some(0) => result.push_str("Command executed successfully"),
                Some(code) => result.push_str(&format!("Command failed with return code {code}")),
                None => result.push_str("Command failed: terminated by signal"),
            }
        }
        result
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)error|failed|invalid|exception|not found|denied|timeout|permission|cannot|unable|forbidden|refused",
        )
        .expect("valid shell failure regex")
    })
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn tag(&self) -> &str {
        SHELL_TAG
    }

    fn description(&self) -> &str {
        "Execute shell commands. Each ```bash block runs with `sh -c` in the working directory."
    }

    async fn execute(&self, blocks: &[String]) -> String {
        if blocks.is_empty() {
            return "Error: No commands provided".to_string();
        }
        let mut output = String::new();
        for block in blocks {
            output.push_str(&self.run_block(block).await);
            output.push('\n');
        }
        output.trim().to_string()
    }

    fn check_failure(&self, output: &str) -> bool {
        failure_pattern().is_match(output)
    }

    fn feedback_label(&self, success: bool) -> String {
        if success {
            "Bash execution successful".to_string()
        } else {
            "Bash execution failed".to_string()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn tool_in(dir: &std::path::Path) -> ShellTool {
        ShellTool::new(ShellConfig {
            work_dir: dir.to_path_buf(),
            ..ShellConfig::default()
        })
    }

    #[tokio::test]
    async fn echo_command() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool_in(dir.path());
        let output = shell.execute(&["echo hello".to_string()]).await;
        assert_eq!(output, "hello");
        assert!(!shell.check_failure(&output));
        assert_eq!(
            shell.interpreter_feedback(&output),
            "[success] Bash execution successful:\nhello"
        );
    }

    #[tokio::test]
    async fn silent_nonzero_exit_reports_return_code() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool_in(dir.path());
        let output = shell.execute(&["exit 1".to_string()]).await;
        assert_eq!(output, "Command failed with return code 1");
        assert!(shell.check_failure(&output));
    }

    #[tokio::test]
    async fn silent_success_and_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool_in(dir.path());
        let output = shell.execute(&["touch marker".to_string()]).await;
        assert_eq!(output, "Command executed successfully");
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn stderr_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool_in(dir.path());
        let output = shell.execute(&["echo oops 1>&2".to_string()]).await;
        assert_eq!(output, "Error: oops");
        assert!(shell.check_failure(&output));
    }

    #[tokio::test]
    async fn blocked_command() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool_in(dir.path());
        let output = shell.execute(&["rm -rf /".to_string()]).await;
        assert!(output.starts_with("Error: Command blocked for safety"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellTool::new(ShellConfig {
            work_dir: dir.path().to_path_buf(),
            timeout_secs: 1,
            ..ShellConfig::default()
        });
        let output = shell.execute(&["sleep 5".to_string()]).await;
        assert_eq!(output, "Error: Command timed out after 1 seconds");
    }

    #[tokio::test]
    async fn empty_block_list() {
        let shell = ShellTool::new(ShellConfig::default());
        assert_eq!(shell.execute(&[]).await, "Error: No commands provided");
    }
}
