use serde::{Deserialize, Serialize};

// =============================================================================
// Chat wire types
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Token counts as the provider reports them.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

// =============================================================================
// Embedding wire types
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    /// Deserialized loosely: some gateways wrap the vector one level deep.
    pub embedding: serde_json::Value,
}

/// Normalize an embedding payload into a flat `Vec<f32>`. Accepts a flat
/// array of numbers or a singly-nested array of arrays.
pub(crate) fn flatten_embedding(value: &serde_json::Value) -> anyhow::Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding payload is not an array"))?;

    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        match item {
            serde_json::Value::Number(n) => {
                out.push(n.as_f64().unwrap_or(0.0) as f32);
            }
            serde_json::Value::Array(inner) => {
                for n in inner {
                    let v = n
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("non-numeric value in nested embedding"))?;
                    out.push(v as f32);
                }
            }
            _ => anyhow::bail!("unexpected value in embedding payload"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_flat_embedding() {
        let value = json!([0.1, 0.2, 0.3]);
        let flat = flatten_embedding(&value).unwrap();
        assert_eq!(flat.len(), 3);
        assert!((flat[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn flattens_nested_embedding() {
        let value = json!([[0.1, 0.2], [0.3]]);
        let flat = flatten_embedding(&value).unwrap();
        assert_eq!(flat, vec![0.1f32, 0.2, 0.3]);
    }

    #[test]
    fn rejects_non_array_embedding() {
        let value = json!("not a vector");
        assert!(flatten_embedding(&value).is_err());
    }

    #[test]
    fn usage_defaults_to_zero_when_absent() {
        let raw = r#"{"choices": [{"message": {"content": "hi"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.usage.is_none());
        let usage = resp.usage.unwrap_or_default();
        assert_eq!(usage.total_tokens, 0);
    }
}
