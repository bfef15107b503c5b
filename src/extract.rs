//! JSON extraction from free-form LLM output.
//!
//! Models wrap JSON in markdown fences, preamble text, or both. The
//! three-strategy extractor below is shared by plan generation and task
//! validation: strip a ```json fence, strip a bare ``` fence, then fall back
//! to slicing from the first `{` to the last `}`.

/// Returns the best-effort JSON object slice of `text`.
///
/// The returned slice is not guaranteed to parse; callers hand it to
/// `serde_json` and deal with the error.
pub fn json_slice(text: &str) -> &str {
    let mut candidate = text.trim();

    if let Some(start) = candidate.find("```json") {
        let body = &candidate[start + 7..];
        candidate = match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    } else if let Some(start) = candidate.find("```") {
        let body = &candidate[start + 3..];
        candidate = match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    if !candidate.starts_with('{') {
        if let (Some(open), Some(close)) = (candidate.find('{'), candidate.rfind('}')) {
            if open < close {
                candidate = &candidate[open..=close];
            }
        }
    }

    candidate
}

/// Extracts and parses a JSON object from `text`.
pub fn json_object(text: &str) -> serde_json::Result<serde_json::Value> {
    serde_json::from_str(json_slice(text))
}
