use serde_json::{Map, Value, json};
use tracing::info;

use crate::{
    codec::decode_data_url,
    error::ServiceError,
    json::{field_or_default, is_truthy, value_or_default},
    oai::{CompatMode, DEFAULT_OAICOMPAT_MODEL, GenerationRequest},
    template::{ChatTemplate, format_chat},
};

/// OpenAI parameters the engine has no counterpart for.
const UNSUPPORTED_PARAMS: [&str; 2] = ["tools", "tool_choice"];

const DEFAULT_N_PROBS: i64 = 2;
const MAX_CHAT_TOP_LOGPROBS: i64 = 20;
const MAX_COMPLETION_LOGPROBS: i64 = 5;

fn illegal(msg: impl Into<String>) -> ServiceError {
    ServiceError::InvalidRequest(format!("Illegal param: {}", msg.into()))
}

fn redact(body: &Map<String, Value>, field: &str) -> Value {
    let mut copy = body.clone();
    if let Some(value) = copy.get_mut(field) {
        *value = match value {
            Value::String(_) => json!("..."),
            _ => json!("[...]"),
        };
    }
    Value::Object(copy)
}

fn as_object(body: &Value) -> Result<&Map<String, Value>, ServiceError> {
    body.as_object()
        .ok_or_else(|| illegal("request body must be a JSON object"))
}

/// Builds engine parameters from a `/v1/completions` or, when a template is
/// given, a `/v1/chat/completions` body.
pub fn normalize_completion(
    body: &Value,
    template: Option<&ChatTemplate>,
) -> Result<GenerationRequest, ServiceError> {
    let object = as_object(body)?;
    let chat = template.is_some();
    let logged_field = if object.contains_key("messages") {
        "messages"
    } else {
        "prompt"
    };
    info!(params = %redact(object, logged_field), "OAI request");

    let mut mode = CompatMode {
        chat,
        ..CompatMode::default()
    };
    let mut params = Map::new();

    params.insert(
        "model".into(),
        json!(value_or_default(body, "model", DEFAULT_OAICOMPAT_MODEL.to_string())),
    );
    params.insert(
        "frequency_penalty".into(),
        json!(value_or_default(body, "frequency_penalty", 0.0_f64)),
    );
    params.insert(
        "temperature".into(),
        json!(value_or_default(body, "temperature", 1.0_f64)),
    );
    params.insert("top_p".into(), json!(value_or_default(body, "top_p", 1.0_f64)));
    params.insert(
        "n_predict".into(),
        json!(value_or_default(body, "max_tokens", -1_i64)),
    );

    match template {
        Some(template) => {
            let messages = object
                .get("messages")
                .ok_or_else(|| illegal("missing required field: messages"))?
                .as_array()
                .ok_or_else(|| illegal("\"messages\" must be an array"))?;
            mode.vision = messages.iter().any(has_image_part);
            if mode.vision {
                // Vision prompts go to the engine as raw content parts.
                let user = messages
                    .iter()
                    .find(|msg| msg.get("role").and_then(Value::as_str) == Some("user"))
                    .and_then(|msg| msg.get("content"))
                    .ok_or_else(|| {
                        illegal("only \"user\" role is supported to request vision completion")
                    })?;
                for url in image_urls(user).filter(|url| url.starts_with("data:")) {
                    decode_data_url(url)?;
                }
                params.insert("prompt".into(), user.clone());
            } else {
                params.insert("prompt".into(), json!(format_chat(template, messages)?));
            }
        }
        None => {
            let prompt = object
                .get("prompt")
                .ok_or_else(|| illegal("missing required field: prompt"))?;
            params.insert("prompt".into(), prompt.clone());
        }
    }

    let stop = match object.get("stop") {
        Some(Value::String(stop)) => vec![stop.clone()],
        _ => value_or_default(body, "stop", Vec::<String>::new()),
    };
    params.insert("stop".into(), json!(stop));

    if object.contains_key("response_format") {
        let response_format = value_or_default(body, "response_format", json!({}));
        let response_type = value_or_default(&response_format, "type", String::new());
        match response_type.as_str() {
            "json_object" => {
                params.insert(
                    "json_schema".into(),
                    value_or_default(&response_format, "schema", json!({})),
                );
            }
            "" | "text" => {}
            other => {
                return Err(illegal(format!(
                    "\"response_format\" must be one of \"text\" or \"json_object\", but got: {other}"
                )));
            }
        }
    }

    if value_or_default(body, "n", 1_i64) != 1 {
        return Err(illegal("only one completion choice is allowed"));
    }

    if is_truthy(object.get("logprobs")) {
        let n_probs = if chat {
            value_or_default(body, "top_logprobs", DEFAULT_N_PROBS).min(MAX_CHAT_TOP_LOGPROBS)
        } else {
            value_or_default(body, "logprobs", DEFAULT_N_PROBS).min(MAX_COMPLETION_LOGPROBS)
        };
        params.insert("n_probs".into(), json!(n_probs));
    } else if !object.contains_key("logprobs") && object.contains_key("top_logprobs") {
        return Err(illegal("\"top_logprobs\" requires \"logprobs\" to be set"));
    }

    if let Some(param) = UNSUPPORTED_PARAMS.iter().find(|p| object.contains_key(**p)) {
        return Err(ServiceError::NotSupported(format!("Unsupported param: {param}")));
    }

    // Everything else goes to the engine untouched, so engine-specific
    // sampling knobs work through this endpoint. A raw `n_predict` overrides
    // the value derived from `max_tokens`.
    for (key, value) in object {
        if key == "messages" || (params.contains_key(key) && key != "n_predict") {
            continue;
        }
        params.insert(key.clone(), value.clone());
    }

    let streaming = field_or_default(params.get("stream"), "stream", false);
    if streaming {
        match object.get("stream_options") {
            None => {
                params.insert("stream_options".into(), json!({ "include_usage": true }));
            }
            Some(Value::Object(opts)) => {
                if !opts.contains_key("include_usage") {
                    let mut opts = opts.clone();
                    opts.insert("include_usage".into(), json!(true));
                    params.insert("stream_options".into(), Value::Object(opts));
                }
            }
            Some(_) => return Err(illegal("invalid type for \"stream_options\" field")),
        }
    }

    Ok(GenerationRequest { params, mode })
}

fn image_urls(content: &Value) -> impl Iterator<Item = &str> {
    content
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part.pointer("/image_url/url").and_then(Value::as_str))
}

fn has_image_part(msg: &Value) -> bool {
    msg.get("content")
        .and_then(Value::as_array)
        .is_some_and(|parts| {
            parts
                .iter()
                .any(|part| part.get("type").and_then(Value::as_str) == Some("image_url"))
        })
}

/// Builds engine parameters from a `/v1/embeddings` body.
pub fn normalize_embedding(body: &Value, model_alias: &str) -> Result<GenerationRequest, ServiceError> {
    let object = as_object(body)?;
    info!(params = %redact(object, "input"), "OAI request");

    let input = object
        .get("input")
        .ok_or_else(|| illegal("missing required field: input"))?;

    let mut params = Map::new();
    params.insert(
        "model".into(),
        json!(value_or_default(body, "model", model_alias.to_string())),
    );
    params.insert("prompt".into(), input.clone());
    params.insert(
        "encoding_format".into(),
        json!(value_or_default(body, "encoding_format", "float".to_string())),
    );

    Ok(GenerationRequest {
        params,
        mode: CompatMode {
            embedding: true,
            ..CompatMode::default()
        },
    })
}
