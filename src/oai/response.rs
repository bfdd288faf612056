use uuid::Uuid;

use crate::{
    codec::base64_encode,
    oai::{
        AssistantMessage, Choice, ChoiceBody, CompletionResponse, Delta, EmbeddingData,
        EmbeddingResponse, EmbeddingUsage, EmbeddingVector, EngineResult, GenerationRequest, Usage,
    },
};

pub fn gen_chatcmplid() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn gen_cmplid() -> String {
    format!("cmpl-{}", Uuid::new_v4().simple())
}

/// Shapes one engine result as a completion, chat completion, or chat chunk.
///
/// `first` only matters for streamed chat: the first unfinished chunk
/// announces the assistant role instead of carrying content.
pub fn assemble_completion(
    request: &GenerationRequest,
    result: &EngineResult,
    completion_id: &str,
    streaming: bool,
    first: bool,
) -> CompletionResponse {
    let finish_reason = result.finish_reason();
    let finished = finish_reason.is_some();
    let content = result.content.clone();

    let (object, body) = if request.mode.chat {
        if streaming {
            let delta = if finished {
                Delta::default()
            } else if first {
                Delta {
                    role: Some("assistant"),
                    content: None,
                }
            } else {
                Delta {
                    role: None,
                    content: Some(content),
                }
            };
            ("chat.completion.chunk", ChoiceBody::Delta(delta))
        } else {
            (
                "chat.completion",
                ChoiceBody::Message(AssistantMessage {
                    content,
                    role: "assistant",
                }),
            )
        }
    } else {
        ("text_completion", ChoiceBody::Text(content))
    };

    let usage = if !streaming || (request.include_usage() && finished) {
        Some(Some(Usage::from_result(result)))
    } else if request.include_usage() {
        Some(None)
    } else {
        None
    };

    CompletionResponse {
        id: completion_id.to_string(),
        object,
        created: chrono::Utc::now().timestamp(),
        model: request.model(),
        choices: vec![Choice {
            finish_reason,
            index: 0,
            body,
            logprobs: result.completion_probabilities.clone(),
        }],
        usage,
    }
}

pub fn assemble_embedding(request: &GenerationRequest, result: &EngineResult) -> EmbeddingResponse {
    let vector = result.embedding.clone().unwrap_or_default();
    let base64 = request.get("encoding_format").and_then(|v| v.as_str()) == Some("base64");
    let embedding = if base64 {
        let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
        EmbeddingVector::Base64(base64_encode(&bytes))
    } else {
        EmbeddingVector::Float(vector)
    };

    EmbeddingResponse {
        model: request.model(),
        object: "list",
        usage: EmbeddingUsage {
            prompt_tokens: result.tokens_evaluated,
            total_tokens: result.tokens_evaluated,
        },
        data: vec![EmbeddingData {
            embedding,
            index: 0,
            object: "embedding",
        }],
    }
}
