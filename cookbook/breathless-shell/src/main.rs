use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use breathless_engine::telemetry::init_tracing;
use breathless_engine::{
    AgentHook, AppConfig, LanguageModel, OllamaClient, Orchestrator, StatusLevel,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const DEFAULT_CONFIG: &str = "config.toml";

const EXAMPLES: &[&str] = &[
    "show scope",
    "add 192.168.1.1 to scope",
    "clear scope",
    "",
    "List the files in my directory",
    "Conduct reconnaissance on target.com",
    "Perform a light port scan on 192.168.1.0/24",
    "Search for CVE-2023-1234 exploits",
];

const HELP: &[&str] = &[
    "quit/exit/bye - Exit the program",
    "clear - Clear the screen",
    "help - Show this help message",
    "status - Show orchestrator status",
    "",
    "Scope Management:",
    "  scope/show scope - Display current penetration test scope",
    "  add <target> to scope - Add IP/domain/network to scope",
    "  remove <target> from scope - Remove target from scope",
    "  clear scope - Clear all targets from scope",
    "",
    "Agent capabilities:",
    "  File operations: create, read, search, bash commands",
    "  Reconnaissance: nmap, dig, whois, network scanning",
    "  Web search: find information, exploits, CVEs, research",
];

#[derive(Debug, Parser)]
#[command(name = "breathless-shell")]
#[command(author, version, about = "Interactive multi-agent penetration testing assistant")]
struct Args {
    /// Path to configuration file (defaults to ./config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Echo streamed model output and enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Prints presentation events to the terminal.
struct ConsoleHook {
    verbose: bool,
}

impl AgentHook for ConsoleHook {
    fn status(&self, message: &str, level: StatusLevel) {
        let marker = match level {
            StatusLevel::Info => "[*]",
            StatusLevel::Success => "[+]",
            StatusLevel::Warning => "[!]",
            StatusLevel::Error => "[x]",
        };
        println!("{marker} {message}");
    }

    fn thinking(&self, message: &str) {
        if self.verbose {
            println!("    ... {message}");
        }
    }

    fn system_message(&self, message: &str) {
        println!("[~] {message}");
    }

    fn tool_execution(&self, tool: &str, block_count: usize) {
        println!("[>] Executing {block_count} {tool} block(s)");
    }

    fn delegation(&self, agent_name: &str) {
        println!("[>] Delegating to {agent_name}...");
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let cfg = match path {
        Some(path) => AppConfig::from_env_or_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => AppConfig::from_env_or_file(DEFAULT_CONFIG)
            .with_context(|| format!("loading {DEFAULT_CONFIG}"))?,
        None => AppConfig::from_env()?,
    };
    Ok(cfg)
}

fn print_lines(lines: &[&str]) {
    for line in lines {
        if line.is_empty() {
            println!();
        } else {
            println!("  {line}");
        }
    }
}

fn print_banner(name: &str) {
    println!("=== {name} :: Autonomous Penetration Testing Framework ===");
    println!("Type 'bye' to exit | 'clear' to clear screen | 'help' for commands");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = load_config(args.config.as_deref())?;
    cfg.main.verbose |= args.verbose;
    init_tracing(cfg.main.verbose)?;

    tokio::fs::create_dir_all(&cfg.main.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", cfg.main.work_dir.display()))?;

    print_banner(&cfg.main.agent_name);
    let model = Arc::new(OllamaClient::from_config(&cfg.model)?);
    println!("[*] Connecting to {} at {}...", model.model_name(), model.host());
    if !model.test_connection().await {
        bail!(
            "cannot reach model `{}` at {}; check that the server is running",
            model.model_name(),
            model.host()
        );
    }

    let hook = Arc::new(ConsoleHook {
        verbose: cfg.main.verbose,
    });
    let mut orchestrator = Orchestrator::from_config(&cfg, model, hook)?;
    let names: Vec<&str> = orchestrator.agents().iter().map(|a| a.name()).collect();
    println!("[+] All systems operational");
    println!("[*] Agents loaded: {}", names.join(", "));
    println!("Example commands:");
    print_lines(EXAMPLES);

    let stop_handles = orchestrator.stop_handles();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        // Ctrl-C at the prompt ends the session.
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n[!] Session interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "bye" => {
                println!("[*] Terminating session");
                if !orchestrator.scope().is_empty() {
                    println!("[!] Scope data cleared");
                }
                println!("\nSee you next time!");
                break;
            }
            "clear" => {
                print!("\x1b[2J\x1b[H");
                print_banner(orchestrator.name());
                continue;
            }
            "help" => {
                print_lines(HELP);
                continue;
            }
            "status" => {
                println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
                continue;
            }
            _ => {}
        }

        let started = Instant::now();
        let answer = {
            let turn = orchestrator.process(input);
            tokio::pin!(turn);
            // Ctrl-C during a turn asks every agent to stop at its next loop check.
            loop {
                tokio::select! {
                    answer = &mut turn => break answer,
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("interrupt received, stopping agents");
                        println!("\n[!] Stopping current operation...");
                        for handle in &stop_handles {
                            handle.request_stop();
                        }
                    }
                }
            }
        };
        println!(
            "\n{} ({:.1}s):\n{answer}",
            orchestrator.name(),
            started.elapsed().as_secs_f32()
        );
    }
    Ok(())
}
