// src/backend/generation.rs — Streaming completions from the local model server
//
// Talks to the OpenAI-compatible `/chat/completions` endpoint with
// `stream: true` and re-emits every content delta on the `chat-token`
// channel, followed by a single `finished` event.

use futures::{Stream, StreamExt};
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};

use super::SamplingParams;
use crate::chat::subscription::TokenChannel;
use crate::chat::types::{Message, Role, TokenEvent};
use crate::infra::errors::SparrowError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You're an AI assistant that provides helpful responses.";

/// One decoded SSE chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub content: Option<String>,
    pub finished: bool,
}

/// Parse the `data:` payload of a completion chunk. `[DONE]` ends the stream.
pub fn parse_chunk(data: &str) -> Result<Delta, SparrowError> {
    if data.trim() == "[DONE]" {
        return Ok(Delta {
            content: None,
            finished: true,
        });
    }
    let parsed: serde_json::Value = serde_json::from_str(data)?;
    let choice = &parsed["choices"][0];
    let content = choice["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from);
    Ok(Delta {
        content,
        finished: !choice["finish_reason"].is_null(),
    })
}

/// Request body for a streaming completion.
pub fn build_body(model: &str, messages: Vec<serde_json::Value>, sampling: &SamplingParams) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if let Some(t) = sampling.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if let Some(p) = sampling.top_p {
        body["top_p"] = serde_json::json!(p);
    }
    if let Some(seed) = sampling.seed {
        body["seed"] = serde_json::json!(seed);
    }
    if let Some(max) = sampling.max_tokens {
        body["max_tokens"] = serde_json::json!(max);
    }
    if let Some(max) = sampling.max_completion_tokens {
        body["max_completion_tokens"] = serde_json::json!(max);
    }
    body
}

/// Chat turns for the request: system prompt, prior history, then the new
/// user message. A trailing history entry identical to the new message is
/// dropped; the caller usually persisted it just before generating.
pub fn build_messages(
    system_prompt: &str,
    mut history: Vec<Message>,
    message: &str,
) -> Vec<serde_json::Value> {
    if history
        .last()
        .is_some_and(|last| last.role == Role::User && last.content == message)
    {
        history.pop();
    }

    let mut msgs = Vec::with_capacity(history.len() + 2);
    msgs.push(serde_json::json!({"role": "system", "content": system_prompt}));
    for m in history {
        msgs.push(serde_json::json!({"role": m.role.as_str(), "content": m.content}));
    }
    msgs.push(serde_json::json!({"role": "user", "content": message}));
    msgs
}

/// Model id as the server knows it: the last path segment of the loaded id.
pub fn served_model_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

pub struct GenerationClient {
    client: reqwest::Client,
    base_url: String,
    channel: TokenChannel,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, channel: TokenChannel) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            channel,
        }
    }

    pub fn channel(&self) -> &TokenChannel {
        &self.channel
    }

    /// Open the completion stream and pump it onto the token channel in the
    /// background. Fails only if the stream cannot be opened.
    pub async fn start(&self, body: serde_json::Value) -> Result<(), SparrowError> {
        let mut es = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", "Bearer unused")
            .json(&body)
            .eventsource()
            .map_err(|e| SparrowError::Generation(format!("Failed to create chat stream: {e}")))?;

        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => {
                // Some servers skip the open event; keep the first chunk.
                let channel = self.channel.clone();
                if forward_chunk(&channel, &msg.data) {
                    channel.emit(TokenEvent::finished());
                    es.close();
                    return Ok(());
                }
            }
            Some(Err(e)) => {
                es.close();
                return Err(SparrowError::Generation(format!(
                    "Failed to create chat stream: {e}"
                )));
            }
            None => {
                return Err(SparrowError::Generation(
                    "chat stream closed before it opened".into(),
                ))
            }
        }

        let channel = self.channel.clone();
        tokio::spawn(pump(es, channel));
        Ok(())
    }
}

/// Emit the chunk's content; returns true when the stream is done.
fn forward_chunk(channel: &TokenChannel, data: &str) -> bool {
    match parse_chunk(data) {
        Ok(delta) => {
            if let Some(content) = delta.content {
                channel.emit(TokenEvent::token(content));
            }
            delta.finished
        }
        Err(e) => {
            tracing::warn!("Failed to parse SSE data: {e}");
            false
        }
    }
}

/// Content deltas of an open completion stream. Ends at `[DONE]`, at a
/// chunk with a `finish_reason`, or at the first transport error.
fn content_deltas(mut es: EventSource) -> impl Stream<Item = String> {
    async_stream::stream! {
        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => match parse_chunk(&msg.data) {
                    Ok(delta) => {
                        if let Some(content) = delta.content {
                            yield content;
                        }
                        if delta.finished {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse SSE data: {e}"),
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    tracing::warn!("SSE stream error: {e}");
                    break;
                }
            }
        }
        es.close();
    }
}

/// Forward every delta, then exactly one `finished`.
async fn pump(es: EventSource, channel: TokenChannel) {
    let mut deltas = Box::pin(content_deltas(es));
    while let Some(content) = deltas.next().await {
        channel.emit(TokenEvent::token(content));
    }
    channel.emit(TokenEvent::finished());
}
