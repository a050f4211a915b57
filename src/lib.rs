//! Multi-agent runtime for driving local language models through tools.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an Ollama client.
//! - A fenced-block tool protocol (`extract_blocks`, `Tool`, `ToolRegistry`).
//! - An `Agent` that retries tool rounds until they succeed or attempts run out.
//! - An `Orchestrator` that routes requests to specialist agents and tracks
//!   engagement scope.

mod agent;
mod blocks;
pub mod config;
mod error;
mod hooks;
mod llm;
mod memory;
mod message;
mod metrics;
mod orchestrator;
mod profiles;
mod reasoning;
mod router;
mod scope;
pub mod telemetry;
mod tool;
pub mod tools;

pub use agent::{Agent, AgentStatus, StopHandle, TurnOutcome, DEFAULT_MAX_ATTEMPTS};
pub use blocks::{
    extract_blocks, parameter_value, replace_blocks_with_placeholders, BlockSet, CLOSING_FENCE,
};
pub use config::AppConfig;
pub use error::{BreathlessError, Result};
pub use hooks::{noop_hook, AgentHook, NoopHook, StatusLevel, TracingHook};
pub use llm::{
    backend_checked, is_backend_error, BlockingLanguageModel, LanguageModel, OffloadedModel,
    OllamaClient, StubModel, BACKEND_ERROR_PREFIX,
};
pub use memory::{ConversationMemory, SessionInfo, DEFAULT_MAX_HISTORY, MIN_MAX_HISTORY};
pub use message::{Message, Role};
pub use metrics::{MetricsTracker, RunGuard, RunOutcome, RunReport, DEFAULT_REPORT_HISTORY};
pub use orchestrator::{orchestrator_prompt, Orchestrator, OrchestratorStatus, Router};
pub use profiles::{
    augment_prompt, build_tools, exhaustion_message, load_system_prompt, results_label,
    retry_message, working_status, AgentKind, ToolSettings,
};
pub use reasoning::{extract_reasoning, strip_reasoning, ReasonedAnswer, THINK_CLOSE, THINK_OPEN};
pub use router::{
    classification_prompt, default_keywords, parse_intent_reply, parse_plan_steps, plan_prompt,
    IntentRouter, KeywordRouter, PlanStep, Route, RoutingDecision, RoutingMode,
    DEFAULT_PRIORITY,
};
pub use scope::{is_valid_target_domain, DetectedTarget, Ipv4Network, ScopeCommand, ScopeRegistry};
pub use tool::{
    format_feedback, resolve_save_path, run_tool, save_blocks, success_payload, Tool,
    ToolExecutionResult, ToolRegistry, FAILURE_MARKER, FEEDBACK_SEPARATOR, SUCCESS_MARKER,
};
