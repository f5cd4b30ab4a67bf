// src/cli/render.rs — Plain-text rendering of segmented messages

use crate::chat::segment::ContentPart;
use crate::chat::types::{Message, Role};
use crate::chat::view::segments;

/// Render one message as terminal text.
pub fn render_message(message: &Message) -> String {
    let mut out = String::new();
    let speaker = match (message.role, message.is_error) {
        (_, true) => "error",
        (Role::User, _) => "you",
        (Role::Assistant, _) => "assistant",
    };
    out.push_str(&format!("[{speaker}]\n"));
    out.push_str(&render_parts(&segments(message)));
    if let Some(tps) = message.tokens_per_second {
        out.push_str(&format!("\n  ({tps:.1} tok/s)"));
    }
    out
}

pub fn render_parts(parts: &[ContentPart]) -> String {
    let mut blocks = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentPart::Text { content } => blocks.push(content.trim().to_string()),
            ContentPart::Reasoning { content, complete } => {
                let header = if *complete { "thinking" } else { "thinking..." };
                blocks.push(quoted(header, content));
            }
            ContentPart::ToolCall {
                name,
                arguments,
                complete,
            } => {
                let name = if name.is_empty() { "?" } else { name.as_str() };
                let suffix = if *complete { "" } else { " ..." };
                blocks.push(format!("  > tool call: {name}({arguments}){suffix}"));
            }
            ContentPart::ToolResponse { content } => {
                blocks.push(quoted("tool response", content));
            }
        }
    }
    blocks.join("\n")
}

fn quoted(header: &str, body: &str) -> String {
    let mut out = format!("  | {header}");
    for line in body.trim().lines() {
        out.push_str("\n  | ");
        out.push_str(line);
    }
    out
}
