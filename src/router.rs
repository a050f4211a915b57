//! Delegation decisions for the orchestrator.
//!
//! Two interchangeable strategies: a keyword router that checks fixed keyword
//! sets in an explicit priority order, and an intent router that asks the
//! model to classify the request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BreathlessError, Result};
use crate::llm::{backend_checked, LanguageModel};
use crate::message::Message;
use crate::profiles::AgentKind;
use crate::reasoning::strip_reasoning;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Direct,
    Single(AgentKind),
    Multi(Vec<AgentKind>),
    Plan(String),
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDecision::Direct => f.write_str("direct"),
            RoutingDecision::Single(kind) => write!(f, "single:{kind}"),
            RoutingDecision::Multi(kinds) => {
                let ids: Vec<&str> = kinds.iter().map(AgentKind::id).collect();
                write!(f, "multi:{}", ids.join(","))
            }
            RoutingDecision::Plan(description) => write!(f, "plan:{description}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Keyword,
    Intent,
}

impl FromStr for RoutingMode {
    type Err = BreathlessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "keywords" => Ok(RoutingMode::Keyword),
            "intent" | "llm" => Ok(RoutingMode::Intent),
            other => Err(BreathlessError::Config(format!(
                "unknown routing strategy `{other}`"
            ))),
        }
    }
}

pub const DEFAULT_PRIORITY: [AgentKind; 3] =
    [AgentKind::Recon, AgentKind::File, AgentKind::WebSearch];

const FILE_KEYWORDS: &[&str] = &[
    "file", "directory", "folder", "bash", "command", "list", "ls", "cd", "mkdir", "rm",
    "create", "delete", "move", "copy", "read", "write", "save", "download", "upload",
];

const RECON_KEYWORDS: &[&str] = &[
    "recon", "reconnaissance", "scan", "nmap", "port", "target", "enumerate", "enumeration",
    "dig", "dns", "whois", "network", "ping", "traceroute", "subdomain", "service",
    "vulnerability", "footprint", "fingerprint", "discovery", "mapping", "probe",
];

const WEB_SEARCH_KEYWORDS: &[&str] = &[
    "search", "google", "web", "online", "lookup", "research", "find information", "look up",
    "search for", "ddg", "news", "latest", "current", "recent", "today", "yesterday",
    "this week", "this month", "updates", "trends", "who is", "how to", "when did",
    "what are", "who are", "how do", "when was", "information about", "details about",
    "facts about", "data on", "statistics", "reports", "articles", "studies", "reviews",
    "learn about", "understand", "tutorial", "guide", "exploit", "cve", "vulnerability",
];

pub fn default_keywords(kind: AgentKind) -> &'static [&'static str] {
    match kind {
        AgentKind::File => FILE_KEYWORDS,
        AgentKind::Recon => RECON_KEYWORDS,
        AgentKind::WebSearch => WEB_SEARCH_KEYWORDS,
    }
}

/// Whether `keyword` starts a word in `text`. Both must already be lowercase.
fn contains_keyword(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Routes on the first category, in priority order, with a keyword hit.
#[derive(Debug, Clone)]
pub struct KeywordRouter {
    priority: Vec<AgentKind>,
}

impl Default for KeywordRouter {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY.to_vec())
    }
}

impl KeywordRouter {
    /// Categories missing from `priority` are never routed to.
    pub fn new(priority: Vec<AgentKind>) -> Self {
        let mut deduped = Vec::with_capacity(priority.len());
        for kind in priority {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        Self { priority: deduped }
    }

    pub fn priority(&self) -> &[AgentKind] {
        &self.priority
    }

    /// First keyword of `kind` found in `prompt`.
    pub fn matched_keyword(&self, kind: AgentKind, prompt: &str) -> Option<&'static str> {
        let prompt = prompt.to_lowercase();
        default_keywords(kind)
            .iter()
            .copied()
            .find(|keyword| contains_keyword(&prompt, keyword))
    }

    pub fn choose(&self, prompt: &str) -> Route {
        let hit = self
            .priority
            .iter()
            .find_map(|kind| self.matched_keyword(*kind, prompt).map(|kw| (*kind, kw)));
        match hit {
            Some((kind, keyword)) => Route::new(
                RoutingDecision::Single(kind),
                format!("keyword `{keyword}` matched {}", kind.id()),
            ),
            None => Route::new(RoutingDecision::Direct, "no routing keyword matched"),
        }
    }

    pub fn route(&self, prompt: &str) -> RoutingDecision {
        self.choose(prompt).decision
    }
}

/// A routing decision with the reason it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub decision: RoutingDecision,
    pub rationale: String,
    /// Extra context the classifier wants passed to delegates
    pub context: Option<String>,
}

impl Route {
    pub fn new(decision: RoutingDecision, rationale: impl Into<String>) -> Self {
        Self {
            decision,
            rationale: rationale.into(),
            context: None,
        }
    }

    fn direct(rationale: impl Into<String>) -> Self {
        Self::new(RoutingDecision::Direct, rationale)
    }
}

fn labelled_field<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '-', ' ']);
        let (name, value) = line.split_once(':')?;
        let name = name.trim().trim_end_matches('*');
        if name.eq_ignore_ascii_case(label) {
            Some(value.trim().trim_start_matches('*').trim())
        } else {
            None
        }
    })
}

fn parse_kinds(list: &str, available: &[AgentKind]) -> Vec<AgentKind> {
    let mut kinds = Vec::new();
    for kind in list
        .split(',')
        .filter_map(|name| name.trim().parse::<AgentKind>().ok())
    {
        if available.contains(&kind) && !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

/// Parse a `ROUTING:` / `REASONING:` / `CONTEXT:` reply. Returns `None` when the
/// routing field is missing or names no available agent.
pub fn parse_intent_reply(reply: &str, available: &[AgentKind]) -> Option<Route> {
    let reply = strip_reasoning(reply);
    let routing = labelled_field(&reply, "ROUTING")?;
    let (kind, rest) = match routing.split_once(':') {
        Some((kind, rest)) => (kind.trim().to_lowercase(), rest.trim()),
        None => (routing.trim().to_lowercase(), ""),
    };
    let decision = match kind.as_str() {
        "direct" => RoutingDecision::Direct,
        "single" => {
            let kinds = parse_kinds(rest, available);
            RoutingDecision::Single(*kinds.first()?)
        }
        "multi" => match parse_kinds(rest, available).as_slice() {
            [] => return None,
            [only] => RoutingDecision::Single(*only),
            many => RoutingDecision::Multi(many.to_vec()),
        },
        "plan" if !rest.is_empty() => RoutingDecision::Plan(rest.to_string()),
        _ => return None,
    };
    let non_empty = |value: Option<&str>| value.filter(|v| !v.is_empty()).map(str::to_string);
    Some(Route {
        decision,
        rationale: non_empty(labelled_field(&reply, "REASONING"))
            .unwrap_or_else(|| "classifier gave no reasoning".to_string()),
        context: non_empty(labelled_field(&reply, "CONTEXT"))
            .filter(|c| !c.eq_ignore_ascii_case("none")),
    })
}

pub fn classification_prompt(available: &[AgentKind]) -> String {
    let mut prompt = String::from(
        "You route requests for a penetration testing assistant. Decide how the request below should be handled.\n\nAvailable agents:\n",
    );
    for kind in available {
        prompt.push_str(&format!("- {}: {}\n", kind.id(), kind.summary()));
    }
    prompt.push_str(
        "\nOptions:\n\
         - direct: answer conversationally without any agent\n\
         - single:<agent_id>: one agent handles the request\n\
         - multi:<agent_id>,<agent_id>: agents run in order, each seeing the previous results\n\
         - plan:<description>: a multi-step task that needs an explicit plan\n\n\
         Reply with exactly these lines:\n\
         ROUTING: <option>\n\
         REASONING: <one sentence>\n\
         CONTEXT: <details the agents should know, or none>",
    );
    prompt
}

/// Asks the model to classify each request. Any failure falls back to direct.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    available: Vec<AgentKind>,
}

impl IntentRouter {
    pub fn new(available: Vec<AgentKind>) -> Self {
        Self { available }
    }

    pub async fn route<M: LanguageModel + ?Sized>(&self, model: &M, prompt: &str) -> Route {
        let messages = [
            Message::system(classification_prompt(&self.available)),
            Message::user(prompt),
        ];
        match model.respond(&messages, false).await.and_then(backend_checked) {
            Ok(reply) => parse_intent_reply(&reply, &self.available).unwrap_or_else(|| {
                tracing::warn!(reply = %reply, "unparseable routing reply, handling directly");
                Route::direct("unparseable routing reply")
            }),
            Err(e) => {
                tracing::warn!(error = %e, "routing call failed, handling directly");
                Route::direct(format!("routing call failed: {e}"))
            }
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub agent: AgentKind,
    pub instruction: String,
}

pub fn plan_prompt(description: &str, request: &str, available: &[AgentKind]) -> String {
    let ids: Vec<&str> = available.iter().map(AgentKind::id).collect();
    format!(
        "Break the following task into sequential steps for the available agents ({}).\n\n\
         Task: {description}\n\
         Original request: {request}\n\n\
         Write one line per step, in order, using exactly this format:\n\
         STEP: <agent_id> | <instruction>",
        ids.join(", ")
    )
}

/// Collect `STEP: <agent_id> | <instruction>` lines naming available agents.
pub fn parse_plan_steps(reply: &str, available: &[AgentKind]) -> Vec<PlanStep> {
    strip_reasoning(reply)
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['*', '-', ' ']);
            let (label, rest) = line.split_once(':')?;
            if !label.trim().eq_ignore_ascii_case("step") {
                return None;
            }
            let (agent, instruction) = rest.split_once('|')?;
            let agent = agent.trim().parse::<AgentKind>().ok()?;
            let instruction = instruction.trim();
            (available.contains(&agent) && !instruction.is_empty()).then(|| PlanStep {
                agent,
                instruction: instruction.to_string(),
            })
        })
        .collect()
}
