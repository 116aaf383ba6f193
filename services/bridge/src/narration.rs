//! Text hygiene for platform-bound responses.

use regex::Regex;
use std::sync::LazyLock;

// The backend narrates avatar motion inline; none of it belongs in a chat
// message or a TTS line.
static STAGE_ACTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[^*]+\*").expect("static pattern"));
static GESTURE_CUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\([^)]*(?:pulse|bounce|drift|circle|approach|settle|expand|warm|glow|vibrat)[^)]*\)")
        .expect("static pattern")
});
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("static pattern"));
static EXTRA_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"  +").expect("static pattern"));

/// Removes `*stage actions*` and parenthesized gesture cues, then collapses
/// the whitespace left behind.
pub fn strip_narration(text: &str) -> String {
    let text = STAGE_ACTIONS.replace_all(text, "");
    let text = GESTURE_CUES.replace_all(&text, "");
    let text = BLANK_LINES.replace_all(&text, "\n");
    let text = EXTRA_SPACES.replace_all(&text, " ");
    text.trim().to_string()
}

/// Splits `text` into chunks of at most `max_len` bytes without splitting a
/// character. Empty text yields no chunks.
pub fn chunks(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > max_len {
            out.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
