use std::sync::Arc;

use serde::Serialize;

use crate::agent::{Agent, StopHandle, TurnOutcome};
use crate::config::AppConfig;
use crate::error::{BreathlessError, Result};
use crate::hooks::{noop_hook, AgentHook, StatusLevel};
use crate::llm::{backend_checked, LanguageModel};
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::metrics::{MetricsTracker, RunReport};
use crate::profiles::{build_tools, AgentKind};
use crate::router::{
    parse_plan_steps, plan_prompt, IntentRouter, KeywordRouter, PlanStep, Route,
    RoutingDecision, RoutingMode,
};
use crate::scope::{ScopeCommand, ScopeRegistry};

const STOPPED_WITHOUT_ANSWER: &str = "The agent was stopped before producing an answer.";

/// Strategy used to pick delegates.
#[derive(Debug, Clone)]
pub enum Router {
    Keyword(KeywordRouter),
    Intent(IntentRouter),
}

impl Router {
    pub fn mode(&self) -> RoutingMode {
        match self {
            Router::Keyword(_) => RoutingMode::Keyword,
            Router::Intent(_) => RoutingMode::Intent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub agent_name: String,
    pub current_agent: Option<String>,
    pub available_agents: Vec<String>,
    pub last_query: Option<String>,
    pub memory_size: usize,
    pub scope_targets: usize,
    pub scope_active: bool,
    pub routing: RoutingMode,
    pub last_decision: Option<String>,
    pub routing_rationale: Option<String>,
    pub last_run: Option<RunReport>,
}

/// System prompt listing each agent and the tools it can drive.
pub fn orchestrator_prompt<M: LanguageModel>(name: &str, agents: &[Agent<M>]) -> String {
    let mut prompt = format!(
        "You are {name}, a penetration testing AI assistant.\n\n\
         You can handle general conversation, but you also have access to specialized agents for specific tasks:\n"
    );
    for agent in agents {
        let kind = agent.kind();
        prompt.push_str(&format!("- {}: {}\n", kind.id(), kind.summary()));
        for tool in agent.tools().iter() {
            prompt.push_str(&format!("  - {}: {}\n", tool.tag(), tool.description()));
        }
    }
    prompt.push_str(
        "\nPENETRATION TESTING SCOPE MANAGEMENT:\n\
         You automatically track penetration test scope (IP addresses, domains, networks) mentioned in conversations.\n\
         Always consider the current scope when performing operations. Focus reconnaissance and testing efforts on targets within scope.\n\n\
         SCOPE COMMANDS (handled directly without delegation):\n\
         - \"show scope\" / \"scope\" - Display current targets\n\
         - \"clear scope\" - Remove all targets from scope\n\
         - \"add <target> to scope\" - Manually add IP/domain/network\n\
         - \"remove <target> from scope\" - Remove specific target\n\n\
         Always be helpful and provide clear, useful responses.",
    );
    prompt
}

fn integration_prompt(request: &str, delegate_output: &str, authoritative: bool) -> String {
    if authoritative {
        format!(
            "The user asked: \"{request}\"\n\n\
             I delegated this to a web search specialist and received current, up-to-date information:\n\
             {delegate_output}\n\n\
             IMPORTANT: The web search results above contain CURRENT information that is more recent and accurate than my training data. \
             I should present these findings as the authoritative answer and NOT contradict them with older information from my training. \
             I must not add facts that are not in the results. If the web search results differ from what I might have known previously, \
             the web search results are correct. ALWAYS present the web search results as the final answer.\n\n\
             Please summarize these current findings clearly and accurately."
        )
    } else {
        format!(
            "The user asked: \"{request}\"\n\n\
             I delegated this to a specialized agent and got this response:\n\
             {delegate_output}\n\n\
             Please provide a helpful summary or explanation of what was accomplished."
        )
    }
}

/// Top-level conversation: handles scope commands, routes requests to
/// specialist agents and folds their output back into its own transcript.
pub struct Orchestrator<M: LanguageModel> {
    name: String,
    model: Arc<M>,
    agents: Vec<Agent<M>>,
    memory: ConversationMemory,
    scope: ScopeRegistry,
    router: Router,
    hook: Arc<dyn AgentHook>,
    metrics: MetricsTracker,
    verbose: bool,
    current_agent: Option<AgentKind>,
    last_route: Option<Route>,
    last_query: Option<String>,
    last_answer: Option<String>,
}

impl<M: LanguageModel> Orchestrator<M> {
    pub fn new(name: impl Into<String>, model: Arc<M>, agents: Vec<Agent<M>>) -> Self {
        let name = name.into();
        Self {
            memory: ConversationMemory::new(orchestrator_prompt(&name, &agents)),
            name,
            model,
            agents,
            scope: ScopeRegistry::new(),
            router: Router::Keyword(KeywordRouter::default()),
            hook: noop_hook(),
            metrics: MetricsTracker::default(),
            verbose: false,
            current_agent: None,
            last_route: None,
            last_query: None,
            last_answer: None,
        }
    }

    /// Build the three specialists and the configured router from `config`.
    pub fn from_config(config: &AppConfig, model: Arc<M>, hook: Arc<dyn AgentHook>) -> Result<Self> {
        let settings = config.tool_settings();
        let metrics = MetricsTracker::with_capacity(config.main.report_history);
        let mut agents = Vec::with_capacity(AgentKind::ALL.len());
        for kind in AgentKind::ALL {
            let tools = build_tools(kind, &settings)?;
            let agent = Agent::new(kind, Arc::clone(&model), tools, settings.work_dir.clone())
                .with_prompts_dir(config.main.prompts_dir.as_deref())
                .with_max_history(config.main.max_history)
                .with_verbose(config.main.verbose)
                .with_hook(Arc::clone(&hook))
                .with_metrics(metrics.clone());
            agents.push(agent);
        }

        let router = match config.routing.strategy {
            RoutingMode::Keyword => Router::Keyword(KeywordRouter::new(config.routing_priority()?)),
            RoutingMode::Intent => Router::Intent(IntentRouter::new(AgentKind::ALL.to_vec())),
        };

        Ok(Self::new(config.main.agent_name.clone(), model, agents)
            .with_router(router)
            .with_hook(hook)
            .with_metrics(metrics)
            .with_verbose(config.main.verbose)
            .with_max_history(config.main.max_history))
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Shared with the agents so the latest run report shows up in `status`.
    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        let prompt = self.memory.system_prompt().to_string();
        self.memory = ConversationMemory::with_max_history(prompt, max_history);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn scope(&self) -> &ScopeRegistry {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeRegistry {
        &mut self.scope
    }

    pub fn agents(&self) -> &[Agent<M>] {
        &self.agents
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.last_answer.as_deref()
    }

    pub fn stop_handles(&self) -> Vec<StopHandle> {
        self.agents.iter().map(Agent::stop_handle).collect()
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            agent_name: self.name.clone(),
            current_agent: self
                .current_agent
                .and_then(|kind| self.agent(kind))
                .map(|agent| agent.name().to_string()),
            available_agents: self.agents.iter().map(|a| a.kind().id().to_string()).collect(),
            last_query: self.last_query.clone(),
            memory_size: self.memory.len(),
            scope_targets: self.scope.len(),
            scope_active: !self.scope.is_empty(),
            routing: self.router.mode(),
            last_decision: self.last_route.as_ref().map(|r| r.decision.to_string()),
            routing_rationale: self.last_route.as_ref().map(|r| r.rationale.clone()),
            last_run: self.metrics.last_report(),
        }
    }

    /// Answer one user message. Never fails: errors become the answer text
    /// and are recorded in memory like any other reply.
    pub async fn process(&mut self, input: &str) -> String {
        self.last_query = Some(input.to_string());
        // Stops only apply to the turn they were requested in.
        for agent in &self.agents {
            agent.stop_handle().clear();
        }

        if let Some(command) = ScopeCommand::parse(input) {
            let reply = self.scope.execute(&command);
            tracing::info!(?command, "scope command");
            self.memory.push_user(input);
            self.memory.push_assistant(reply.clone());
            self.last_answer = Some(reply.clone());
            return reply;
        }

        self.record_targets(input);

        let answer = match self.route_and_answer(input).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, "request failed");
                self.hook.status(&e.to_string(), StatusLevel::Error);
                let reply = format!("I encountered an error while processing your request: {e}");
                self.memory.push_user(input);
                self.memory.push_assistant(reply.clone());
                reply
            }
        };
        self.last_answer = Some(answer.clone());
        answer
    }

    /// Add targets mentioned in `text` to the scope.
    fn record_targets(&mut self, text: &str) {
        for target in self.scope.auto_detect(text) {
            self.hook
                .status(&format!("Added to scope: {target}"), StatusLevel::Info);
        }
    }

    async fn route_and_answer(&mut self, input: &str) -> Result<String> {
        let route = match &self.router {
            Router::Keyword(router) => router.choose(input),
            Router::Intent(router) => router.route(self.model.as_ref(), input).await,
        };
        tracing::info!(decision = %route.decision, rationale = %route.rationale, "routing decision");
        self.last_route = Some(route.clone());
        let Route { decision, context, .. } = route;

        match decision {
            RoutingDecision::Direct => self.answer_directly(input).await,
            RoutingDecision::Single(kind) if self.agent(kind).is_some() => {
                let steps = vec![PlanStep {
                    agent: kind,
                    instruction: input.to_string(),
                }];
                self.delegate(input, &steps, context.as_deref()).await
            }
            RoutingDecision::Multi(kinds) => {
                let steps: Vec<PlanStep> = kinds
                    .into_iter()
                    .filter(|kind| self.agent(*kind).is_some())
                    .map(|agent| PlanStep {
                        agent,
                        instruction: input.to_string(),
                    })
                    .collect();
                if steps.is_empty() {
                    return self.answer_directly(input).await;
                }
                self.delegate(input, &steps, context.as_deref()).await
            }
            RoutingDecision::Plan(description) => {
                let steps = self.plan(&description, input).await?;
                if steps.is_empty() {
                    tracing::warn!("plan had no usable steps, handling directly");
                    return self.answer_directly(input).await;
                }
                self.delegate(input, &steps, context.as_deref()).await
            }
            RoutingDecision::Single(kind) => {
                tracing::warn!(agent = kind.id(), "agent not available, handling directly");
                self.answer_directly(input).await
            }
        }
    }

    fn agent(&self, kind: AgentKind) -> Option<&Agent<M>> {
        self.agents.iter().find(|a| a.kind() == kind)
    }

    fn scope_context(&self) -> Option<String> {
        (!self.scope.is_empty()).then(|| {
            format!(
                "\n\nCURRENT PENETRATION TEST SCOPE:\n{}\n\nAlways consider the current scope when performing operations. Focus reconnaissance and testing efforts on targets within scope.",
                self.scope.summary()
            )
        })
    }

    fn scope_reminder(&self) -> Option<String> {
        (!self.scope.is_empty()).then(|| {
            format!(
                "\n\nREMINDER - Current penetration test scope:\n{}\n\nFocus your operations on the targets within scope.",
                self.scope.summary()
            )
        })
    }

    /// Ask the model with the transcript plus `prompt`, without recording it.
    async fn ask(&self, prompt: &str) -> Result<String> {
        let mut messages = self
            .memory
            .snapshot_with_context(self.scope_context().as_deref());
        messages.push(Message::user(prompt));
        backend_checked(self.model.respond(&messages, self.verbose).await?)
    }

    async fn answer_directly(&mut self, input: &str) -> Result<String> {
        let reply = self.ask(input).await?;
        self.memory.push_user(input);
        self.memory.push_assistant(reply.clone());
        Ok(reply)
    }

    async fn plan(&self, description: &str, input: &str) -> Result<Vec<PlanStep>> {
        let available: Vec<AgentKind> = self.agents.iter().map(Agent::kind).collect();
        let messages = [
            Message::system(self.memory.system_prompt()),
            Message::user(plan_prompt(description, input, &available)),
        ];
        let reply = backend_checked(self.model.respond(&messages, self.verbose).await?)?;
        let steps = parse_plan_steps(&reply, &available);
        tracing::info!(steps = steps.len(), "plan ready");
        Ok(steps)
    }

    /// Run `steps` strictly in order, feeding earlier results forward, then
    /// integrate the combined output with one more model call. A stopped
    /// step ends the request without integration.
    async fn delegate(&mut self, input: &str, steps: &[PlanStep], context: Option<&str>) -> Result<String> {
        let reminder = self.scope_reminder();
        let mut sections: Vec<(String, String)> = Vec::with_capacity(steps.len());

        for step in steps {
            let mut agent_input = step.instruction.clone();
            if let Some(context) = context.filter(|c| !c.eq_ignore_ascii_case("none")) {
                agent_input.push_str(&format!("\n\nContext: {context}"));
            }
            if let Some(reminder) = &reminder {
                agent_input.push_str(reminder);
            }
            if !sections.is_empty() {
                agent_input.push_str("\n\nResults from previous agents:");
                for (name, output) in &sections {
                    agent_input.push_str(&format!("\n[{name}]\n{output}"));
                }
            }

            let agent = self
                .agents
                .iter_mut()
                .find(|a| a.kind() == step.agent)
                .ok_or_else(|| BreathlessError::Protocol(format!("agent `{}` not available", step.agent)))?;
            self.current_agent = Some(step.agent);
            self.hook.delegation(agent.name());
            tracing::info!(agent = step.agent.id(), "delegating");

            let output = match agent.process(&agent_input).await? {
                TurnOutcome::Done(answer) | TurnOutcome::Exhausted(answer) => answer,
                TurnOutcome::Stopped(partial) => {
                    tracing::warn!(agent = step.agent.id(), "delegate stopped, skipping integration");
                    self.hook.status("Operation stopped", StatusLevel::Warning);
                    let reply = partial.unwrap_or_else(|| STOPPED_WITHOUT_ANSWER.to_string());
                    self.memory.push_user(input);
                    self.memory.push_assistant(reply.clone());
                    return Ok(reply);
                }
            };
            sections.push((agent.name().to_string(), output));
        }

        let delegate_output = match sections.as_slice() {
            [(_, only)] => only.clone(),
            many => many
                .iter()
                .map(|(name, output)| format!("[{name}]\n{output}"))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        let authoritative = steps.iter().any(|s| s.agent == AgentKind::WebSearch);
        let prompt = integration_prompt(input, &delegate_output, authoritative);

        let reply = self.ask(&prompt).await?;
        self.record_targets(&prompt);
        self.memory.push_user(prompt);
        self.memory.push_assistant(reply.clone());
        Ok(reply)
    }
}
