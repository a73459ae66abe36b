use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use crate::llm::{GeminiClient, LlmError};

const DETECTION_PROMPT: &str = "List the distinct physical objects visible in this image. \
Reply with a JSON array of short lowercase English nouns, for example [\"person\", \"laptop\", \"cup\"]. \
Reply with [] if nothing is recognisable.";

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Object labels visible in a JPEG frame, deduplicated and sorted.
    async fn detect(&self, jpeg: &[u8]) -> Result<Vec<String>, LlmError>;
}

/// Object detection through the Gemini vision model.
pub struct GeminiObjectDetector {
    client: GeminiClient,
}

impl GeminiObjectDetector {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectDetector for GeminiObjectDetector {
    async fn detect(&self, jpeg: &[u8]) -> Result<Vec<String>, LlmError> {
        let reply = self.client.generate_with_image(DETECTION_PROMPT, jpeg).await?;
        let labels = parse_labels(&reply);
        debug!(?labels, "objects detected");
        Ok(labels)
    }
}

/// Parse a model reply into a label set.
///
/// Accepts a JSON array of strings (optionally inside a ```json fence) or a
/// plain comma/newline separated list.
pub fn parse_labels(reply: &str) -> Vec<String> {
    let body = strip_fence(reply);

    let raw: Vec<String> = match serde_json::from_str::<Vec<String>>(body) {
        Ok(items) => items,
        Err(_) => body
            .split([',', '\n'])
            .map(|s| {
                s.trim()
                    .trim_start_matches(['-', '*', '['])
                    .trim_end_matches([']', '.'])
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_string()
            })
            .collect(),
    };

    raw.into_iter()
        .map(|label| label.trim().to_lowercase())
        .filter(|label| !label.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub(crate) fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_array() {
        assert_eq!(
            parse_labels(r#"["Laptop", "person", " cup "]"#),
            vec!["cup", "laptop", "person"]
        );
    }

    #[test]
    fn fenced_json_array() {
        let reply = "```json\n[\"chair\", \"Chair\", \"desk\"]\n```";
        assert_eq!(parse_labels(reply), vec!["chair", "desk"]);
    }

    #[test]
    fn plain_lists() {
        assert_eq!(parse_labels("Person, dog,\ncar."), vec!["car", "dog", "person"]);
        assert_eq!(parse_labels("- tree\n- Bench\n"), vec!["bench", "tree"]);
    }

    #[test]
    fn empty_replies() {
        assert!(parse_labels("[]").is_empty());
        assert!(parse_labels("   ").is_empty());
    }

    #[test]
    fn fence_without_language() {
        assert_eq!(strip_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_fence("plain"), "plain");
    }
}
