// src/backend/title.rs — Session titles derived from the first user message

const MAX_TITLE_CHARS: usize = 60;
/// A word break earlier than this makes the title too short; cut hard instead.
const MIN_BREAK_CHARS: usize = 40;

/// Build a session title from message text: trimmed, at most 60 chars
/// (cut on a word boundary when one is reasonably close), first letter
/// capitalized.
pub fn generate_chat_title(content: &str) -> String {
    let cleaned = content.trim();
    let chars: Vec<char> = cleaned.chars().collect();

    let title = if chars.len() <= MAX_TITLE_CHARS {
        cleaned.to_string()
    } else {
        let head = &chars[..MAX_TITLE_CHARS];
        let break_point = head
            .iter()
            .rposition(|c| *c == ' ')
            .filter(|pos| *pos > MIN_BREAK_CHARS)
            .unwrap_or(MAX_TITLE_CHARS);
        let cut: String = chars[..break_point].iter().collect();
        let cut = cut.trim_end_matches(['.', ',', '!', '?', ';', ':', ' ']);
        format!("{cut}...")
    };

    capitalize_first(&title)
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
