// src/chat/segment.rs — Split message text into typed blocks
//
// Models interleave plain text with delimited blocks:
//
//   <think>...</think>                 reasoning
//   <tool_call>{json}</tool_call>      tool invocation
//   <tool_response>...</tool_response> tool output
//
// While a response streams, the last block may still be open. The scanner
// keeps a single open-block slot: an opener with no closer after it is shown
// as an incomplete block running to the end of the text.

use serde::Deserialize;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Reasoning,
    ToolCall,
    ToolResponse,
}

impl BlockKind {
    const ALL: [BlockKind; 3] = [
        BlockKind::Reasoning,
        BlockKind::ToolCall,
        BlockKind::ToolResponse,
    ];

    pub fn open_tag(&self) -> &'static str {
        match self {
            BlockKind::Reasoning => "<think>",
            BlockKind::ToolCall => "<tool_call>",
            BlockKind::ToolResponse => "<tool_response>",
        }
    }

    pub fn close_tag(&self) -> &'static str {
        match self {
            BlockKind::Reasoning => "</think>",
            BlockKind::ToolCall => "</tool_call>",
            BlockKind::ToolResponse => "</tool_response>",
        }
    }

    /// Tool responses arrive whole; they are never displayed in progress.
    fn may_stream_open(&self) -> bool {
        !matches!(self, BlockKind::ToolResponse)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
        complete: bool,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
        complete: bool,
    },
    ToolResponse {
        content: String,
    },
}

impl ContentPart {
    pub fn is_complete(&self) -> bool {
        match self {
            ContentPart::Reasoning { complete, .. } | ContentPart::ToolCall { complete, .. } => {
                *complete
            }
            _ => true,
        }
    }
}

/// A part together with the raw byte range it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub part: ContentPart,
    pub span: Range<usize>,
}

#[derive(Deserialize)]
struct ToolCallBody {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Partition `content` into ordered parts.
pub fn segment(content: &str, is_streaming: bool) -> Vec<ContentPart> {
    segment_with_spans(content, is_streaming)
        .into_iter()
        .map(|s| s.part)
        .collect()
}

/// Like [`segment`], keeping each part's source range. Whitespace-only gaps
/// between blocks are not emitted; [`tile`] recovers them.
pub fn segment_with_spans(content: &str, is_streaming: bool) -> Vec<Segment> {
    let blocks = scan_blocks(content, is_streaming);

    if blocks.is_empty() {
        return vec![Segment {
            part: ContentPart::Text {
                content: content.to_string(),
            },
            span: 0..content.len(),
        }];
    }

    let mut out = Vec::with_capacity(blocks.len() * 2 + 1);
    let mut cursor = 0;
    for block in blocks {
        push_gap(content, cursor..block.span.start, &mut out);
        cursor = block.span.end;
        out.push(block);
    }
    push_gap(content, cursor..content.len(), &mut out);
    out
}

/// Every byte range of `content` in order: emitted segments plus the
/// whitespace gaps that were skipped. The ranges are contiguous and cover
/// the whole string.
pub fn tile(content: &str, is_streaming: bool) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = 0;
    for seg in segment_with_spans(content, is_streaming) {
        if seg.span.start > cursor {
            ranges.push(cursor..seg.span.start);
        }
        cursor = seg.span.end;
        ranges.push(seg.span);
    }
    if cursor < content.len() {
        ranges.push(cursor..content.len());
    }
    ranges
}

fn push_gap(content: &str, range: Range<usize>, out: &mut Vec<Segment>) {
    let gap = &content[range.clone()];
    if gap.trim().is_empty() {
        return;
    }
    out.push(Segment {
        part: ContentPart::Text {
            content: gap.to_string(),
        },
        span: range,
    });
}

/// Earliest opening delimiter at or after `from`.
fn next_opener(content: &str, from: usize) -> Option<(BlockKind, usize)> {
    BlockKind::ALL
        .iter()
        .filter_map(|kind| {
            content[from..]
                .find(kind.open_tag())
                .map(|offset| (*kind, from + offset))
        })
        .min_by_key(|(_, at)| *at)
}

/// First opener at or after `from` that has no closer after it. Openers
/// whose block closes are skipped.
fn unterminated_opener(content: &str, from: usize) -> Option<BlockKind> {
    let mut pos = from;
    while let Some((kind, at)) = next_opener(content, pos) {
        let body_start = at + kind.open_tag().len();
        match content[body_start..].find(kind.close_tag()) {
            Some(offset) => pos = body_start + offset + kind.close_tag().len(),
            None => return Some(kind),
        }
    }
    None
}

/// Left-to-right scan producing the delimited blocks only.
fn scan_blocks(content: &str, is_streaming: bool) -> Vec<Segment> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some((kind, open_at)) = next_opener(content, pos) {
        let body_start = open_at + kind.open_tag().len();

        match content[body_start..].find(kind.close_tag()) {
            Some(offset) => {
                let body_end = body_start + offset;
                let span_end = body_end + kind.close_tag().len();
                let body = &content[body_start..body_end];
                if let Some(part) = closed_part(kind, body) {
                    blocks.push(Segment {
                        part,
                        span: open_at..span_end,
                    });
                }
                pos = span_end;
            }
            None if is_streaming && kind.may_stream_open() => {
                let body = &content[body_start..];
                if let Some(nested) = unterminated_opener(content, body_start) {
                    tracing::warn!(
                        outer = kind.open_tag(),
                        inner = nested.open_tag(),
                        "second unterminated block inside an open block; rendering as content"
                    );
                }
                blocks.push(Segment {
                    part: open_part(kind, body),
                    span: open_at..content.len(),
                });
                break;
            }
            None => {
                // Stray opener: stays in the surrounding text.
                pos = body_start;
            }
        }
    }

    blocks
}

fn closed_part(kind: BlockKind, body: &str) -> Option<ContentPart> {
    match kind {
        BlockKind::Reasoning => Some(ContentPart::Reasoning {
            content: body.to_string(),
            complete: true,
        }),
        BlockKind::ToolResponse => Some(ContentPart::ToolResponse {
            content: body.to_string(),
        }),
        BlockKind::ToolCall => match parse_tool_call(body) {
            Ok((name, arguments)) => Some(ContentPart::ToolCall {
                name,
                arguments,
                complete: true,
            }),
            Err(e) => {
                tracing::warn!("malformed tool call, showing as text: {e}");
                None
            }
        },
    }
}

fn open_part(kind: BlockKind, body: &str) -> ContentPart {
    match kind {
        BlockKind::ToolCall => {
            // The body is usually half-written JSON; take what is readable.
            let (name, arguments) = parse_tool_call(body)
                .unwrap_or_else(|_| (partial_name(body).unwrap_or_default(), serde_json::Value::Null));
            ContentPart::ToolCall {
                name,
                arguments,
                complete: false,
            }
        }
        _ => ContentPart::Reasoning {
            content: body.to_string(),
            complete: false,
        },
    }
}

fn parse_tool_call(body: &str) -> Result<(String, serde_json::Value), serde_json::Error> {
    let parsed: ToolCallBody = serde_json::from_str(body.trim())?;
    // Some models double-encode arguments as a JSON string.
    let arguments = match parsed.arguments {
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
        }
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };
    Ok((parsed.name, arguments))
}

/// Pull `"name": "..."` out of an unfinished tool-call body.
fn partial_name(body: &str) -> Option<String> {
    let after_key = &body[body.find("\"name\"")? + "\"name\"".len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?.trim_start();
    let value = after_colon.strip_prefix('"')?;
    let end = value.find('"')?;
    Some(value[..end].to_string())
}
