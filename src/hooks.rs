use std::sync::Arc;

/// Severity attached to status updates shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Optional presentation surface injected into agents and the orchestrator.
///
/// Every method defaults to a no-op so components behave identically with or
/// without a front end attached.
pub trait AgentHook: Send + Sync {
    fn status(&self, _message: &str, _level: StatusLevel) {}

    fn thinking(&self, _message: &str) {}

    fn system_message(&self, _message: &str) {}

    fn tool_execution(&self, _tool: &str, _block_count: usize) {}

    fn delegation(&self, _agent_name: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl AgentHook for NoopHook {}

/// Forwards presentation events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl AgentHook for TracingHook {
    fn status(&self, message: &str, level: StatusLevel) {
        match level {
            StatusLevel::Info | StatusLevel::Success => tracing::info!(?level, "{message}"),
            StatusLevel::Warning => tracing::warn!("{message}"),
            StatusLevel::Error => tracing::error!("{message}"),
        }
    }

    fn thinking(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn system_message(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn tool_execution(&self, tool: &str, block_count: usize) {
        tracing::info!(tool, block_count, "executing blocks");
    }

    fn delegation(&self, agent_name: &str) {
        tracing::info!(agent = agent_name, "delegating request");
    }
}

pub fn noop_hook() -> Arc<dyn AgentHook> {
    Arc::new(NoopHook)
}
