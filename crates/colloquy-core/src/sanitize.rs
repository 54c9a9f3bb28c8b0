//! Model output clean-up.
//!
//! Completion models tend to continue the transcript they were given, so the
//! reply is taken to be whatever follows the last role marker. This is a
//! heuristic: a legitimate reply that itself contains one of the literal
//! markers gets truncated at that point.

use colloquy_types::error::GenerationError;

use crate::generator::PromptRole;

pub const ROLE_MARKERS: [&str; 3] = [
    PromptRole::System.marker(),
    PromptRole::Human.marker(),
    PromptRole::Assistant.marker(),
];

/// Keep only the text after the last role marker, trim it, and drop a
/// leading echo of `preamble`. An empty result is a failure.
pub fn sanitize(raw: &str, preamble: &str) -> Result<String, GenerationError> {
    let cut = ROLE_MARKERS
        .iter()
        .filter_map(|marker| raw.rfind(marker).map(|start| (start, start + marker.len())))
        .max_by_key(|(start, _)| *start)
        .map(|(_, end)| end)
        .unwrap_or(0);

    let mut reply = raw[cut..].trim();

    let preamble = preamble.trim();
    if !preamble.is_empty() {
        if let Some(rest) = reply.strip_prefix(preamble) {
            reply = rest.trim();
        }
    }

    if reply.is_empty() {
        return Err(GenerationError::SanitizationFailure);
    }
    Ok(reply.to_string())
}
