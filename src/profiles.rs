//! Specialist agent categories and their fixed prompt material.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;

use crate::error::{BreathlessError, Result};
use crate::tool::ToolRegistry;
use crate::tools::{DuckDuckGoConfig, FileFinderTool, ShellConfig, ShellTool, WebSearchTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    File,
    Recon,
    WebSearch,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::File, AgentKind::Recon, AgentKind::WebSearch];

    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::File => "file_agent",
            AgentKind::Recon => "recon_agent",
            AgentKind::WebSearch => "web_search_agent",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::File => "File Operative",
            AgentKind::Recon => "Recon Specialist",
            AgentKind::WebSearch => "Web Intelligence",
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            AgentKind::File => "files",
            AgentKind::Recon => "reconnaissance",
            AgentKind::WebSearch => "web_search",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            AgentKind::File => "file operations, directory management and local shell commands",
            AgentKind::Recon => "network reconnaissance, port scanning and DNS/WHOIS lookups",
            AgentKind::WebSearch => "current information, news and research from the web",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentKind {
    type Err = BreathlessError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "file_agent" | "file" | "files" | "file_operative" => Ok(AgentKind::File),
            "recon_agent" | "recon" | "reconnaissance" | "recon_specialist" => {
                Ok(AgentKind::Recon)
            }
            "web_search_agent" | "web_search" | "web" | "search" | "research"
            | "research_agent" | "web_intelligence" => Ok(AgentKind::WebSearch),
            _ => Err(BreathlessError::Protocol(format!("unknown agent `{s}`"))),
        }
    }
}

/// Status text shown while a round is running.
pub fn working_status(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::File => "Analyzing request...",
        AgentKind::Recon => "Planning reconnaissance...",
        AgentKind::WebSearch => "Searching the web...",
    }
}

/// Label heading the accumulated tool results in a final answer.
pub fn results_label(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::File => "Results:",
        AgentKind::Recon => "Reconnaissance Results:",
        AgentKind::WebSearch => "Search Results:",
    }
}

/// Corrective user message pushed after a failed round.
pub fn retry_message(kind: AgentKind, feedback: &str) -> String {
    match kind {
        AgentKind::File => format!(
            "The previous command failed: {feedback}. Please try a different approach."
        ),
        AgentKind::Recon => format!(
            "The previous reconnaissance command failed: {feedback}. Please try a different approach or check the target/command syntax."
        ),
        AgentKind::WebSearch => format!(
            "The search failed: {feedback}. Try a different search approach or simpler query."
        ),
    }
}

pub fn exhaustion_message(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::File => {
            "Operation failed after multiple attempts. Please try a different approach."
        }
        AgentKind::Recon => {
            "Reconnaissance operation failed after multiple attempts. Please verify target accessibility and command syntax."
        }
        AgentKind::WebSearch => {
            "Web search failed after multiple attempts. Please try simpler search terms."
        }
    }
}

/// Append the category's working instructions and block examples to `prompt`.
pub fn augment_prompt(kind: AgentKind, prompt: &str, work_dir: &Path) -> String {
    let work_dir = work_dir.display();
    match kind {
        AgentKind::File => format!(
            r#"{prompt}

You must work in directory: {work_dir}

For file operations, you can use:

1. **Bash commands** in ```bash blocks:
```bash
ls -la
find . -name "*.txt"
cat file.txt
```

2. **File finder operations** in ```file_finder blocks with format:
```file_finder
action=read
name=filename.txt
```

Available actions: info (default), read

Always explain what you're doing and provide clear feedback about results."#
        ),
        AgentKind::Recon => format!(
            r#"{prompt}

You must work in directory: {work_dir}

For reconnaissance operations, use bash commands in ```bash blocks:

Light scan:
```bash
nmap --min-rate=1000 -p 22,80,443,8080 -T4 target -oN light-scan.txt
```
Secondary scan:
```bash
nmap -sC -sV --top-ports 1000 target -oN secondary-scan.txt
```

```bash
dig target
```

```bash
whois target
```

IMPORTANT SAFETY GUIDELINES:
1. Only scan targets you have explicit permission to test
2. Use reasonable rate limits to avoid overwhelming targets
3. Always save scan results to files for documentation
4. Be respectful of network resources
5. Follow responsible disclosure practices

Always explain what reconnaissance you're performing and why."#
        ),
        AgentKind::WebSearch => format!(
            r#"{prompt}

Current time: {now}

For web searches, use web_search blocks:

```web_search
your search query
```

Examples:
- Current information:
  ```web_search
  latest AI developments
  ```

- Research topics:
  ```web_search
  cybersecurity trends
  ```

Always explain what you're searching for and provide clear summaries of the results."#,
            now = Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
    }
}

/// Read `<prompts_dir>/<agent_id>.txt`, falling back to a generic persona.
pub fn load_system_prompt(prompts_dir: Option<&Path>, kind: AgentKind) -> String {
    let fallback = || format!("You are {}, a helpful AI assistant.", kind.display_name());
    let Some(dir) = prompts_dir else {
        return fallback();
    };
    let path = dir.join(format!("{}.txt", kind.id()));
    match std::fs::read_to_string(&path) {
        Ok(prompt) if !prompt.trim().is_empty() => prompt,
        Ok(_) => fallback(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "using default agent prompt");
            fallback()
        }
    }
}

/// Settings the tool sets are built from.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub work_dir: PathBuf,
    pub shell: ShellConfig,
    pub search: DuckDuckGoConfig,
}

/// Tools for a category, in execution priority order.
pub fn build_tools(kind: AgentKind, settings: &ToolSettings) -> Result<ToolRegistry> {
    let shell_config = ShellConfig {
        work_dir: settings.work_dir.clone(),
        ..settings.shell.clone()
    };
    let mut registry = ToolRegistry::new();
    match kind {
        AgentKind::File => {
            registry.register(FileFinderTool::new(settings.work_dir.clone()));
            registry.register(ShellTool::new(shell_config));
        }
        AgentKind::Recon => registry.register(ShellTool::new(shell_config)),
        AgentKind::WebSearch => {
            registry.register(WebSearchTool::duckduckgo(settings.search.clone())?)
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_aliases() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.id().parse::<AgentKind>().unwrap(), kind);
        }
        assert_eq!("Recon".parse::<AgentKind>().unwrap(), AgentKind::Recon);
        assert_eq!("web-search".parse::<AgentKind>().unwrap(), AgentKind::WebSearch);
        assert_eq!(" files ".parse::<AgentKind>().unwrap(), AgentKind::File);
        assert!("chef".parse::<AgentKind>().is_err());
    }

    #[test]
    fn retry_message_embeds_feedback() {
        assert_eq!(
            retry_message(AgentKind::File, "[failure] boom"),
            "The previous command failed: [failure] boom. Please try a different approach."
        );
    }

    #[test]
    fn augmentation_keeps_prompt_and_work_dir() {
        let text = augment_prompt(AgentKind::Recon, "scan 10.0.0.5", Path::new("/tmp/work"));
        assert!(text.starts_with("scan 10.0.0.5\n\nYou must work in directory: /tmp/work"));
        let text = augment_prompt(AgentKind::WebSearch, "news", Path::new("/tmp/work"));
        assert!(text.contains("Current time: "));
    }

    #[test]
    fn prompt_files_override_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("recon_agent.txt"), "You map networks.").unwrap();
        assert_eq!(
            load_system_prompt(Some(dir.path()), AgentKind::Recon),
            "You map networks."
        );
        assert_eq!(
            load_system_prompt(Some(dir.path()), AgentKind::File),
            "You are File Operative, a helpful AI assistant."
        );
        assert_eq!(
            load_system_prompt(None, AgentKind::WebSearch),
            "You are Web Intelligence, a helpful AI assistant."
        );
    }

    #[test]
    fn file_tools_run_finder_before_shell() {
        let settings = ToolSettings {
            work_dir: PathBuf::from("."),
            shell: ShellConfig::default(),
            search: DuckDuckGoConfig::default(),
        };
        let tools = build_tools(AgentKind::File, &settings).unwrap();
        assert_eq!(tools.names(), vec!["file_finder", "bash"]);
        let tools = build_tools(AgentKind::WebSearch, &settings).unwrap();
        assert_eq!(tools.names(), vec!["web_search"]);
    }
}
