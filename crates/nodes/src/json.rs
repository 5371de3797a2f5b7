//! Extraction of JSON objects from free-form model output.

use serde::de::DeserializeOwned;

/// Parses the first JSON object in `text`.
///
/// Markdown code fences are stripped, and any prose before the first `{` or
/// after the last `}` is ignored.
pub(crate) fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    let body = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };
    serde_json::from_str(body)
}
