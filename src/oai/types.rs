use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    json::{field_or_default, value_or_default},
    probs::ProbsFormat,
};

/// Which compatibility surface produced a [`GenerationRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompatMode {
    pub chat: bool,
    pub vision: bool,
    pub embedding: bool,
}

/// Engine-facing parameters built from an OpenAI-style body.
///
/// `params` is what the engine consumes; `mode` stays on this side of the
/// boundary and tells the response assembler which shape to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub(crate) params: Map<String, Value>,
    pub mode: CompatMode,
}

impl GenerationRequest {
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn into_params(self) -> Map<String, Value> {
        self.params
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    fn lookup<T: serde::de::DeserializeOwned>(&self, key: &str, default: T) -> T {
        field_or_default(self.params.get(key), key, default)
    }

    pub fn model(&self) -> String {
        self.lookup("model", super::DEFAULT_OAICOMPAT_MODEL.to_string())
    }

    pub fn prompt(&self) -> Option<&Value> {
        self.params.get("prompt")
    }

    pub fn stream(&self) -> bool {
        self.lookup("stream", false)
    }

    pub fn include_usage(&self) -> bool {
        self.params
            .get("stream_options")
            .is_some_and(|opts| value_or_default(opts, "include_usage", false))
    }

    pub fn stop(&self) -> Vec<String> {
        self.lookup("stop", Vec::new())
    }

    /// `-1` means unbounded.
    pub fn n_predict(&self) -> i64 {
        self.lookup("n_predict", -1)
    }

    pub fn n_probs(&self) -> usize {
        self.lookup("n_probs", 0)
    }

    pub fn probs_format(&self) -> ProbsFormat {
        if self.mode.chat {
            ProbsFormat::Chat
        } else {
            ProbsFormat::Completion
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub prompt_ms: f64,
    pub predicted_per_token_ms: f64,
    pub predicted_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drafted_n: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drafted_accepted_p: Option<f64>,
}

/// One step (or the final state) of a generation as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineResult {
    pub content: String,
    pub stopped_word: bool,
    pub stopped_eos: bool,
    pub stopped_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_word: Option<String>,
    pub tokens_predicted: u64,
    pub tokens_evaluated: u64,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_probabilities: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl EngineResult {
    /// Reads an untyped engine result field by field; wrongly typed fields
    /// fall back to their defaults.
    pub fn from_json(result: &Value) -> Self {
        let timings = value_or_default(result, "timings", Value::Object(Map::new()));
        Self {
            content: value_or_default(result, "content", String::new()),
            stopped_word: value_or_default(result, "stopped_word", false),
            stopped_eos: value_or_default(result, "stopped_eos", false),
            stopped_limit: value_or_default(result, "stopped_limit", false),
            stopping_word: value_or_default(result, "stopping_word", None),
            tokens_predicted: value_or_default(result, "tokens_predicted", 0),
            tokens_evaluated: value_or_default(result, "tokens_evaluated", 0),
            timings: Timings {
                prompt_ms: value_or_default(&timings, "prompt_ms", 0.0),
                predicted_per_token_ms: value_or_default(&timings, "predicted_per_token_ms", 0.0),
                predicted_per_second: value_or_default(&timings, "predicted_per_second", 0.0),
                drafted_n: value_or_default(&timings, "drafted_n", None),
                drafted_accepted_p: value_or_default(&timings, "drafted_accepted_p", None),
            },
            completion_probabilities: result.get("completion_probabilities").cloned(),
            embedding: value_or_default(result, "embedding", None),
        }
    }

    /// A length stop takes precedence over a word or EOS stop.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        if self.stopped_limit {
            Some(FinishReason::Length)
        } else if self.stopped_word || self.stopped_eos {
            Some(FinishReason::Stop)
        } else {
            None
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftStats {
    pub draft_tokens: u64,
    pub draft_tokens_acceptance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub completion_tokens: u64,
    pub prompt_tokens: u64,
    pub total_tokens: u64,
    pub time_to_first_token_ms: f64,
    pub time_per_output_token_ms: f64,
    pub tokens_per_second: f64,
    #[serde(flatten)]
    pub draft: Option<DraftStats>,
}

impl Usage {
    pub fn from_result(result: &EngineResult) -> Self {
        let timings = &result.timings;
        Self {
            completion_tokens: result.tokens_predicted,
            prompt_tokens: result.tokens_evaluated,
            total_tokens: result.tokens_predicted + result.tokens_evaluated,
            time_to_first_token_ms: timings.prompt_ms,
            time_per_output_token_ms: timings.predicted_per_token_ms,
            tokens_per_second: timings.predicted_per_second,
            draft: timings.drafted_n.map(|draft_tokens| DraftStats {
                draft_tokens,
                draft_tokens_acceptance: timings.drafted_accepted_p,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    pub content: String,
    pub role: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceBody {
    Delta(Delta),
    Message(AssistantMessage),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub finish_reason: Option<FinishReason>,
    pub index: u32,
    #[serde(flatten)]
    pub body: ChoiceBody,
    pub logprobs: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    /// Absent, `null`, or the totals, depending on mode and stream position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Option<Usage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Float(Vec<f32>),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingData {
    pub embedding: EmbeddingVector,
    pub index: u32,
    pub object: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResponse {
    pub model: String,
    pub object: &'static str,
    pub usage: EmbeddingUsage,
    pub data: Vec<EmbeddingData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn limit_wins_over_eos() {
        let result = EngineResult::from_json(&json!({ "stopped_limit": true, "stopped_eos": true }));
        assert_eq!(result.finish_reason(), Some(FinishReason::Length));

        let result = EngineResult::from_json(&json!({ "stopped_word": true }));
        assert_eq!(result.finish_reason(), Some(FinishReason::Stop));

        assert_eq!(EngineResult::default().finish_reason(), None);
    }

    #[test]
    fn from_json_tolerates_wrong_types() {
        let result = EngineResult::from_json(&json!({
            "content": 5,
            "tokens_predicted": "many",
            "tokens_evaluated": 7,
            "timings": { "prompt_ms": 12.5, "drafted_n": 4, "drafted_accepted_p": 0.5 },
        }));
        assert_eq!(result.content, "");
        assert_eq!(result.tokens_predicted, 0);
        assert_eq!(result.tokens_evaluated, 7);
        assert_eq!(result.timings.prompt_ms, 12.5);
        assert_eq!(result.timings.drafted_n, Some(4));
    }

    #[test]
    fn usage_includes_draft_stats_only_when_reported() {
        let mut result = EngineResult {
            tokens_predicted: 3,
            tokens_evaluated: 4,
            ..Default::default()
        };
        let usage = serde_json::to_value(Usage::from_result(&result)).unwrap();
        assert_eq!(usage["total_tokens"], 7);
        assert!(usage.get("draft_tokens").is_none());

        result.timings.drafted_n = Some(10);
        result.timings.drafted_accepted_p = Some(0.75);
        let usage = serde_json::to_value(Usage::from_result(&result)).unwrap();
        assert_eq!(usage["draft_tokens"], 10);
        assert_eq!(usage["draft_tokens_acceptance"], 0.75);
    }

    #[test]
    fn choice_body_flattens_under_its_key() {
        let choice = Choice {
            finish_reason: None,
            index: 0,
            body: ChoiceBody::Delta(Delta::default()),
            logprobs: None,
        };
        assert_eq!(
            serde_json::to_value(choice).unwrap(),
            json!({ "finish_reason": null, "index": 0, "delta": {}, "logprobs": null })
        );
    }
}
