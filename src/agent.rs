use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blocks::replace_blocks_with_placeholders;
use crate::error::Result;
use crate::hooks::{noop_hook, AgentHook, StatusLevel};
use crate::llm::{backend_checked, LanguageModel};
use crate::memory::ConversationMemory;
use crate::metrics::{MetricsTracker, RunGuard, RunOutcome};
use crate::profiles::{
    augment_prompt, exhaustion_message, load_system_prompt, results_label, retry_message,
    working_status, AgentKind,
};
use crate::reasoning::ReasonedAnswer;
use crate::tool::{run_tool, save_blocks, success_payload, ToolRegistry};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Cooperative stop flag, polled once at the top of every round.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Drop a pending request that no turn consumed.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Ready,
    Analyzing,
    Executing,
    Retrying { attempt: usize },
    Done,
    Failed,
    Stopped,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Ready => f.write_str("Ready"),
            AgentStatus::Analyzing => f.write_str("Analyzing request"),
            AgentStatus::Executing => f.write_str("Executing blocks"),
            AgentStatus::Retrying { attempt } => write!(f, "Retry attempt {attempt}"),
            AgentStatus::Done => f.write_str("Done"),
            AgentStatus::Failed => f.write_str("Failed"),
            AgentStatus::Stopped => f.write_str("Stopped"),
        }
    }
}

/// How a call to [`Agent::process`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A round finished without a failing tool.
    Done(String),
    /// Every attempt failed; carries the category's exhaustion message.
    Exhausted(String),
    /// A stop was requested; carries whatever answer this turn produced.
    Stopped(Option<String>),
}

impl TurnOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            TurnOutcome::Done(answer) | TurnOutcome::Exhausted(answer) => Some(answer),
            TurnOutcome::Stopped(answer) => answer.as_deref(),
        }
    }

    pub fn into_answer(self) -> Option<String> {
        match self {
            TurnOutcome::Done(answer) | TurnOutcome::Exhausted(answer) => Some(answer),
            TurnOutcome::Stopped(answer) => answer,
        }
    }
}

enum RoundResult {
    Succeeded(Vec<String>),
    Failed(String),
}

/// A specialist that drives the model through fenced tool blocks, retrying
/// failed rounds with corrective feedback.
pub struct Agent<M: LanguageModel> {
    kind: AgentKind,
    name: String,
    model: Arc<M>,
    tools: ToolRegistry,
    memory: ConversationMemory,
    work_dir: PathBuf,
    max_attempts: usize,
    verbose: bool,
    hook: Arc<dyn AgentHook>,
    metrics: Option<MetricsTracker>,
    stop: StopHandle,
    status: AgentStatus,
    last_answer: Option<String>,
    last_reasoning: Option<String>,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(
        kind: AgentKind,
        model: Arc<M>,
        tools: ToolRegistry,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            name: kind.display_name().to_string(),
            model,
            tools,
            memory: ConversationMemory::new(load_system_prompt(None, kind)),
            work_dir: work_dir.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            verbose: false,
            hook: noop_hook(),
            metrics: None,
            stop: StopHandle::default(),
            status: AgentStatus::Ready,
            last_answer: None,
            last_reasoning: None,
        }
    }

    /// Replace the system prompt. Resets the agent's memory.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let max_history = self.memory.max_history();
        self.memory = ConversationMemory::with_max_history(prompt, max_history);
        self
    }

    /// Load the system prompt from `<dir>/<agent_id>.txt` when present.
    pub fn with_prompts_dir(self, dir: Option<&Path>) -> Self {
        let prompt = load_system_prompt(dir, self.kind);
        self.with_system_prompt(prompt)
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        let prompt = self.memory.system_prompt().to_string();
        self.memory = ConversationMemory::with_max_history(prompt, max_history);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.last_answer.as_deref()
    }

    pub fn last_reasoning(&self) -> Option<&str> {
        self.last_reasoning.as_deref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Run one request through the retry loop.
    ///
    /// Backend failures return `Err` without retrying. Tool failures are fed
    /// back to the model until the attempt bound is reached.
    pub async fn process(&mut self, prompt: &str) -> Result<TurnOutcome> {
        let mut run = self
            .metrics
            .as_ref()
            .map(|m| m.start_run(self.kind.id()));

        self.memory
            .push_user(augment_prompt(self.kind, prompt, &self.work_dir));

        let mut attempts = 0;
        loop {
            if self.stop.is_stop_requested() {
                self.stop.clear();
                self.status = AgentStatus::Stopped;
                tracing::info!(agent = self.kind.id(), "stop requested, leaving turn");
                finish(run, RunOutcome::Stopped);
                self.status = AgentStatus::Ready;
                return Ok(TurnOutcome::Stopped(None));
            }

            if attempts == 0 {
                self.status = AgentStatus::Analyzing;
            } else {
                self.status = AgentStatus::Retrying { attempt: attempts };
                self.hook.thinking(&format!("Retry attempt {attempts}"));
            }
            self.hook.status(working_status(self.kind), StatusLevel::Info);
            if let Some(run) = run.as_mut() {
                run.record_attempt();
            }

            let raw = match self.ask_model().await {
                Ok(raw) => raw,
                Err(e) => {
                    self.status = AgentStatus::Failed;
                    self.hook.status(&e.to_string(), StatusLevel::Error);
                    tracing::error!(agent = self.kind.id(), error = %e, "model call failed");
                    finish(run, RunOutcome::Errored);
                    self.status = AgentStatus::Ready;
                    return Err(e);
                }
            };

            let parsed = ReasonedAnswer::parse(&raw);
            self.last_reasoning = parsed.reasoning;
            self.memory.push_assistant(parsed.answer.clone());

            self.status = AgentStatus::Executing;
            match self.execute_round(&parsed.answer, run.as_mut()).await {
                RoundResult::Succeeded(payloads) => {
                    let base = replace_blocks_with_placeholders(&parsed.answer);
                    let answer = if payloads.is_empty() {
                        base
                    } else {
                        format!(
                            "{base}\n\n{}\n{}",
                            results_label(self.kind),
                            payloads.join("\n")
                        )
                    };
                    self.status = AgentStatus::Done;
                    self.last_answer = Some(answer.clone());
                    finish(run, RunOutcome::Done);
                    self.status = AgentStatus::Ready;
                    return Ok(TurnOutcome::Done(answer));
                }
                RoundResult::Failed(feedback) => {
                    self.memory.push_user(retry_message(self.kind, &feedback));
                    attempts += 1;
                    tracing::warn!(
                        agent = self.kind.id(),
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        "tool round failed"
                    );
                    if attempts >= self.max_attempts {
                        break;
                    }
                    self.hook.status(
                        &format!(
                            "Operation failed, retrying... ({attempts}/{})",
                            self.max_attempts
                        ),
                        StatusLevel::Warning,
                    );
                }
            }
        }

        let message = exhaustion_message(self.kind).to_string();
        self.hook.status("Max retries reached", StatusLevel::Error);
        tracing::warn!(agent = self.kind.id(), attempts, "retries exhausted");
        self.status = AgentStatus::Failed;
        self.last_answer = Some(message.clone());
        finish(run, RunOutcome::Exhausted);
        self.status = AgentStatus::Ready;
        Ok(TurnOutcome::Exhausted(message))
    }

    async fn ask_model(&self) -> Result<String> {
        let raw = self
            .model
            .respond(self.memory.messages(), self.verbose)
            .await?;
        backend_checked(raw)
    }

    /// Run every tool with blocks in registration order. The first failing
    /// tool ends the round.
    async fn execute_round(&self, answer: &str, mut run: Option<&mut RunGuard>) -> RoundResult {
        let mut payloads = Vec::new();
        let mut executed = 0;
        for (tool, set) in self.tools.blocks_for(answer) {
            executed += 1;
            self.hook.tool_execution(tool.name(), set.len());
            tracing::info!(
                agent = self.kind.id(),
                tool = tool.name(),
                blocks = set.len(),
                "executing blocks"
            );

            let result = run_tool(tool.as_ref(), &set.blocks).await;
            if let Some(run) = run.as_deref_mut() {
                run.record_tool_run(result.success);
            }
            if !result.success {
                return RoundResult::Failed(result.feedback_message);
            }

            if let Some(save_path) = &set.save_path {
                match save_blocks(&self.work_dir, save_path, &set.blocks).await {
                    Ok(path) => tracing::info!(path = %path.display(), "saved blocks"),
                    Err(e) => {
                        tracing::warn!(save_path = %save_path, error = %e, "could not save blocks")
                    }
                }
            }
            if let Some(payload) = success_payload(&result.feedback_message) {
                payloads.push(payload.to_string());
            }
        }
        if executed == 0 {
            self.hook.system_message("No executable blocks found in response");
        }
        RoundResult::Succeeded(payloads)
    }
}

fn finish(run: Option<RunGuard>, outcome: RunOutcome) {
    if let Some(run) = run {
        run.finish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::BreathlessError;
    use crate::message::Role;
    use crate::tool::Tool;
    use crate::StubModel;

    struct FixedTool {
        output: &'static str,
        fails: bool,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            "fixed"
        }

        fn tag(&self) -> &str {
            "fixed"
        }

        fn description(&self) -> &str {
            "Returns a fixed output"
        }

        async fn execute(&self, _blocks: &[String]) -> String {
            self.output.to_string()
        }

        fn check_failure(&self, _output: &str) -> bool {
            self.fails
        }
    }

    fn agent_with(model: Arc<StubModel>, tool: FixedTool, work_dir: &Path) -> Agent<StubModel> {
        let mut tools = ToolRegistry::new();
        tools.register(tool);
        Agent::new(AgentKind::File, model, tools, work_dir)
    }

    #[tokio::test]
    async fn stops_after_three_failed_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec!["```fixed\nx\n```"; 5]);
        let tool = FixedTool { output: "boom", fails: true };
        let metrics = MetricsTracker::default();
        let mut agent = agent_with(model.clone(), tool, dir.path()).with_metrics(metrics.clone());

        let outcome = agent.process("do the thing").await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Exhausted(exhaustion_message(AgentKind::File).to_string())
        );
        assert_eq!(model.calls(), 3);
        let retries = agent
            .memory()
            .iter()
            .filter(|m| {
                m.role == Role::User
                    && m.content.starts_with("The previous command failed: [failure]")
            })
            .count();
        assert_eq!(retries, 3);
        let report = metrics.last_report().unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.outcome, RunOutcome::Exhausted);
        assert_eq!(agent.status(), AgentStatus::Ready);
    }

    #[tokio::test]
    async fn stop_before_first_round_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec!["unused"]);
        let tool = FixedTool { output: "ok", fails: false };
        let mut agent = agent_with(model.clone(), tool, dir.path());

        let handle = agent.stop_handle();
        handle.request_stop();
        let outcome = agent.process("anything").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Stopped(None));
        assert_eq!(model.calls(), 0);
        assert!(!handle.is_stop_requested());

        let outcome = agent.process("again").await.unwrap();
        assert_eq!(outcome.answer(), Some("unused"));
    }

    #[tokio::test]
    async fn success_replaces_blocks_and_labels_results() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec![
            "<think>list it</think>Listing:\n```fixed\nls\n```\nDone.",
        ]);
        let tool = FixedTool { output: "a.txt", fails: false };
        let mut agent = agent_with(model, tool, dir.path());

        let outcome = agent.process("list files").await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Done("Listing:\nblock:0\nDone.\n\nResults:\na.txt".into())
        );
        assert_eq!(agent.last_reasoning(), Some("<think>list it</think>"));
        assert_eq!(
            agent.memory().last().unwrap().content,
            "Listing:\n```fixed\nls\n```\nDone."
        );
    }

    #[tokio::test]
    async fn plain_answer_needs_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec!["Nothing to run."]);
        let tool = FixedTool { output: "unused", fails: true };
        let mut agent = agent_with(model, tool, dir.path());

        let outcome = agent.process("hello").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Done("Nothing to run.".into()));
    }

    #[tokio::test]
    async fn recovers_after_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec!["```fixed\nbad\n```", "All set."]);
        let tool = FixedTool { output: "nope", fails: true };
        let mut agent = agent_with(model.clone(), tool, dir.path());

        let outcome = agent.process("try").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Done("All set.".into()));
        let second_request = &model.requests()[1];
        assert!(second_request
            .last()
            .unwrap()
            .content
            .contains("Please try a different approach."));
    }

    #[tokio::test]
    async fn backend_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec![
            "Error: Ollama connection failed at http://127.0.0.1:11434. Check if server is running.",
            "unused",
        ]);
        let tool = FixedTool { output: "ok", fails: false };
        let mut agent = agent_with(model.clone(), tool, dir.path());

        let err = agent.process("hi").await.unwrap_err();
        assert!(matches!(err, BreathlessError::Backend(_)));
        assert_eq!(model.calls(), 1);
        assert_eq!(agent.status(), AgentStatus::Ready);

        // The next turn starts from a clean state.
        let outcome = agent.process("again").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Done("unused".into()));
    }

    #[tokio::test]
    async fn saves_blocks_with_directive() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new(vec!["```fixed\nscan.sh:\nnmap host\n```"]);
        let tool = FixedTool { output: "ran", fails: false };
        let mut agent = agent_with(model, tool, dir.path());

        agent.process("scan").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("scan.sh")).unwrap(),
            "nmap host"
        );
    }
}
