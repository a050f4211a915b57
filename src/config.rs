use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BreathlessError, Result};
use crate::memory::{DEFAULT_MAX_HISTORY, MIN_MAX_HISTORY};
use crate::metrics::DEFAULT_REPORT_HISTORY;
use crate::profiles::{AgentKind, ToolSettings};
use crate::router::{RoutingMode, DEFAULT_PRIORITY};
use crate::tools::shell::{default_blocked_commands, ShellConfig};
use crate::tools::web_search::DuckDuckGoConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MainConfig {
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Directory holding `<agent_id>.txt` system prompts
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
    /// Number of run reports kept by the metrics tracker
    #[serde(default = "default_report_history")]
    pub report_history: usize,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            work_dir: default_work_dir(),
            verbose: false,
            max_history: default_max_history(),
            prompts_dir: None,
            report_history: default_report_history(),
        }
    }
}

fn default_agent_name() -> String {
    "BreathlessSymphony".into()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("~/agentic_workspace")
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_report_history() -> usize {
    DEFAULT_REPORT_HISTORY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_server_address")]
    pub server_address: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            server_address: default_server_address(),
        }
    }
}

fn default_provider() -> String {
    "ollama".into()
}

fn default_model() -> String {
    "gemma3:27b".into()
}

fn default_server_address() -> String {
    "127.0.0.1:11434".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingMode,
    /// Agent ids, highest priority first
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingMode::default(),
            priority: default_priority(),
        }
    }
}

fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|kind| kind.id().to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellSection {
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout(),
            blocked_commands: default_blocked_commands(),
        }
    }
}

fn default_shell_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSection {
    #[serde(default = "default_search_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_results: default_search_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_results() -> usize {
    DuckDuckGoConfig::default().max_results
}

fn default_search_timeout() -> u64 {
    DuckDuckGoConfig::default().timeout_secs
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub search: SearchSection,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut cfg: Self = toml::from_str(raw)
            .map_err(|err| BreathlessError::Config(format!("Failed to parse configuration: {err}")))?;
        cfg.main.work_dir = expand_home(&cfg.main.work_dir);
        cfg.main.prompts_dir = cfg.main.prompts_dir.as_deref().map(expand_home);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.main.work_dir = expand_home(&cfg.main.work_dir);
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Rejects values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.main.max_history < MIN_MAX_HISTORY {
            return Err(BreathlessError::Config(format!(
                "main.max_history must be at least {MIN_MAX_HISTORY}, got {}",
                self.main.max_history
            )));
        }
        if self.main.report_history == 0 {
            return Err(BreathlessError::Config(
                "main.report_history must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var("BREATHLESS_WORK_DIR") {
            self.main.work_dir = expand_home(Path::new(&dir));
        }
        if let Ok(model) = env::var("BREATHLESS_MODEL") {
            self.model.model = model;
        }
        if let Ok(server) = env::var("BREATHLESS_SERVER") {
            self.model.server_address = server;
        }
        if let Ok(verbose) = env::var("BREATHLESS_VERBOSE") {
            if let Ok(parsed) = verbose.parse::<bool>() {
                self.main.verbose = parsed;
            }
        }
        if let Ok(routing) = env::var("BREATHLESS_ROUTING") {
            self.routing.strategy = routing.parse()?;
        }
        Ok(())
    }

    /// Keyword priority as agent kinds. Unknown ids are a config error.
    pub fn routing_priority(&self) -> Result<Vec<AgentKind>> {
        self.routing
            .priority
            .iter()
            .map(|id| {
                id.parse::<AgentKind>().map_err(|_| {
                    BreathlessError::Config(format!("unknown agent `{id}` in routing.priority"))
                })
            })
            .collect()
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            work_dir: self.main.work_dir.clone(),
            shell: ShellConfig {
                work_dir: self.main.work_dir.clone(),
                timeout_secs: self.shell.timeout_secs,
                blocked_commands: self.shell.blocked_commands.clone(),
            },
            search: DuckDuckGoConfig {
                max_results: self.search.max_results,
                timeout_secs: self.search.timeout_secs,
            },
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.main.agent_name, "BreathlessSymphony");
        assert_eq!(cfg.main.max_history, 50);
        assert_eq!(cfg.model.provider, "ollama");
        assert_eq!(cfg.model.server_address, "127.0.0.1:11434");
        assert_eq!(cfg.routing.strategy, RoutingMode::Keyword);
        assert_eq!(cfg.routing_priority().unwrap(), DEFAULT_PRIORITY.to_vec());
        assert_eq!(cfg.shell.timeout_secs, 30);
        assert!(!cfg.main.work_dir.starts_with("~") || dirs::home_dir().is_none());
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[main]\nwork_dir='/tmp/ops'\nmax_history=20\n[model]\nmodel='llama3'\n[routing]\nstrategy='intent'\npriority=['file', 'recon']"
        )
        .unwrap();

        env::set_var("BREATHLESS_SERVER", "10.1.1.1:11434");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("BREATHLESS_SERVER");

        assert_eq!(cfg.main.work_dir, PathBuf::from("/tmp/ops"));
        assert_eq!(cfg.main.max_history, 20);
        assert_eq!(cfg.model.model, "llama3");
        assert_eq!(cfg.model.server_address, "10.1.1.1:11434");
        assert_eq!(cfg.routing.strategy, RoutingMode::Intent);
        assert_eq!(
            cfg.routing_priority().unwrap(),
            vec![AgentKind::File, AgentKind::Recon]
        );
    }

    #[test]
    fn rejects_unknown_priority_entries() {
        let cfg = AppConfig::from_toml_str("[routing]\npriority=['chef']").unwrap();
        assert!(matches!(cfg.routing_priority(), Err(BreathlessError::Config(_))));
    }

    #[test]
    fn rejects_history_too_small_for_a_turn() {
        for raw in ["[main]\nmax_history=0", "[main]\nmax_history=1", "[main]\nreport_history=0"] {
            let err = AppConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, BreathlessError::Config(_)), "{raw}");
        }
        let cfg = AppConfig::from_toml_str("[main]\nmax_history=2\nreport_history=7").unwrap();
        assert_eq!(cfg.main.max_history, 2);
        assert_eq!(cfg.main.report_history, 7);
    }

    #[test]
    fn tool_settings_share_work_dir() {
        let cfg = AppConfig::from_toml_str("[main]\nwork_dir='/srv/work'\n[shell]\ntimeout_secs=5").unwrap();
        let settings = cfg.tool_settings();
        assert_eq!(settings.shell.work_dir, PathBuf::from("/srv/work"));
        assert_eq!(settings.shell.timeout_secs, 5);
        assert_eq!(settings.search.max_results, 8);
    }
}
