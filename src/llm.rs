//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::config::ModelConfig;
use crate::error::{BreathlessError, Result};
use crate::message::Message;

/// Prefix backends use for failures reported as text.
pub const BACKEND_ERROR_PREFIX: &str = "Error";

/// Whether a completion is the backend's error text rather than an answer.
pub fn is_backend_error(text: &str) -> bool {
    text.starts_with(BACKEND_ERROR_PREFIX)
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete the conversation. `verbose` echoes streamed tokens.
    async fn respond(&self, messages: &[Message], verbose: bool) -> Result<String>;

    fn model_name(&self) -> &str;

    async fn test_connection(&self) -> bool {
        match self.respond(&[Message::user("Hello")], false).await {
            Ok(text) => !is_backend_error(&text),
            Err(e) => {
                tracing::warn!(error = %e, "model connection test failed");
                false
            }
        }
    }
}

/// Completion text, or a [`BreathlessError::Backend`] when the backend answered
/// with its error marker.
pub fn backend_checked(text: String) -> Result<String> {
    if is_backend_error(&text) {
        Err(BreathlessError::Backend(text))
    } else {
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

enum ChatOutcome {
    Text(String),
    ModelMissing,
}

/// Ollama client for local LLM inference, streaming `/api/chat` responses.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    model: String,
    host: String,
}

impl OllamaClient {
    pub fn new(model: impl Into<String>, server_address: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // Local models can be slow
            .build()
            .map_err(|e| BreathlessError::LanguageModel(format!("http client error: {e}")))?;
        Ok(Self {
            http,
            model: model.into(),
            host: host_url(server_address),
        })
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        if !cfg.provider.eq_ignore_ascii_case("ollama") {
            return Err(BreathlessError::Config(format!(
                "unsupported model provider `{}`",
                cfg.provider
            )));
        }
        Self::new(cfg.model.clone(), &cfg.server_address)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn connection_error(&self) -> BreathlessError {
        BreathlessError::Backend(format!(
            "Error: Ollama connection failed at {}. Check if server is running.",
            self.host
        ))
    }

    async fn chat(&self, messages: &[Message], verbose: bool) -> Result<ChatOutcome> {
        let payload = json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| OllamaMessage { role: m.role.as_str(), content: &m.content })
                .collect::<Vec<_>>(),
            "stream": true,
        });

        if verbose {
            println!("Sending request to {}", self.host);
        }
        tracing::debug!(model = %self.model, messages = messages.len(), "ollama chat request");

        let resp = self
            .http
            .post(format!("{}/api/chat", self.host))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    self.connection_error()
                } else {
                    BreathlessError::LanguageModel(format!("Error communicating with Ollama: {e}"))
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(ChatOutcome::ModelMissing);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BreathlessError::LanguageModel(format!(
                "Error communicating with Ollama: {status}: {body}"
            )));
        }

        let mut content = String::new();
        let mut pending = Vec::new();
        let mut done = false;
        let mut stream = resp.bytes_stream();
        while !done {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk.map_err(|e| {
                BreathlessError::LanguageModel(format!("Error communicating with Ollama: {e}"))
            })?;
            pending.extend_from_slice(&chunk);
            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                done = consume_line(&line, &mut content, verbose)?;
                if done {
                    break;
                }
            }
        }
        if !done && !pending.is_empty() {
            consume_line(&pending, &mut content, verbose)?;
        }
        if verbose {
            println!();
        }
        Ok(ChatOutcome::Text(content))
    }

    async fn pull_model(&self) -> Result<()> {
        tracing::info!(model = %self.model, "model not found, pulling");
        let resp = self
            .http
            .post(format!("{}/api/pull", self.host))
            .json(&json!({ "model": self.model, "stream": false }))
            .send()
            .await
            .map_err(|e| self.pull_error(e))?;
        resp.error_for_status().map_err(|e| self.pull_error(e))?;
        Ok(())
    }

    fn pull_error(&self, e: reqwest::Error) -> BreathlessError {
        BreathlessError::LanguageModel(format!(
            "Error: Failed to download model {}: {e}",
            self.model
        ))
    }
}

fn host_url(server_address: &str) -> String {
    let address = server_address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Apply one NDJSON line to `content`. Returns `true` once the stream is done.
fn consume_line(line: &[u8], content: &mut String, verbose: bool) -> Result<bool> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: OllamaChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(BreathlessError::LanguageModel(format!(
            "Error communicating with Ollama: {error}"
        )));
    }
    if let Some(message) = chunk.message {
        if verbose {
            print!("{}", message.content);
            let _ = std::io::stdout().flush();
        }
        content.push_str(&message.content);
    }
    Ok(chunk.done)
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn respond(&self, messages: &[Message], verbose: bool) -> Result<String> {
        match self.chat(messages, verbose).await? {
            ChatOutcome::Text(text) => Ok(text),
            ChatOutcome::ModelMissing => {
                self.pull_model().await?;
                match self.chat(messages, verbose).await? {
                    ChatOutcome::Text(text) => Ok(text),
                    ChatOutcome::ModelMissing => Err(BreathlessError::LanguageModel(format!(
                        "Error: model {} still missing after pull",
                        self.model
                    ))),
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A model whose requests block the calling thread.
pub trait BlockingLanguageModel: Send + Sync + 'static {
    fn respond_blocking(&self, messages: &[Message], verbose: bool) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Runs a [`BlockingLanguageModel`] on the blocking pool, one request at a time.
pub struct OffloadedModel<B: BlockingLanguageModel> {
    inner: Arc<B>,
    gate: Semaphore,
}

impl<B: BlockingLanguageModel> OffloadedModel<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner: Arc::new(inner),
            gate: Semaphore::new(1),
        }
    }
}

#[async_trait]
impl<B: BlockingLanguageModel> LanguageModel for OffloadedModel<B> {
    async fn respond(&self, messages: &[Message], verbose: bool) -> Result<String> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BreathlessError::LanguageModel(format!("model gate closed: {e}")))?;
        let inner = Arc::clone(&self.inner);
        let messages = messages.to_vec();
        tokio::task::spawn_blocking(move || inner.respond_blocking(&messages, verbose))
            .await
            .map_err(|e| BreathlessError::LanguageModel(format!("model task failed: {e}")))?
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// A deterministic model used for tests and demos.
///
/// Replies are popped from a script in order; every request is recorded so
/// tests can inspect what the model was shown.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn respond(&self, messages: &[Message], _verbose: bool) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(messages.to_vec());
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| {
                BreathlessError::LanguageModel("StubModel ran out of scripted responses".into())
            })
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}
