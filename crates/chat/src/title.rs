/// Title for a conversation derived from its first user message.
///
/// Keeps the first `max_chars` characters and appends `...` when the message
/// is longer. Returns `None` for blank input.
pub fn derive_title(first_message: &str, max_chars: usize) -> Option<String> {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() <= max_chars {
        return Some(trimmed.to_string());
    }
    let head: String = trimmed.chars().take(max_chars).collect();
    Some(format!("{}...", head.trim_end()))
}
