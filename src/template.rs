//! Chat template rendering on top of minijinja.

use minijinja::{Environment, ErrorKind, context};
use serde::Serialize;
use serde_json::Value;

use crate::{error::ServiceError, json::value_or_default};

const TEMPLATE_NAME: &str = "chat";

const CHATML: &str = "{% for message in messages %}\
{{ '<|im_start|>' + message.role + '\\n' + message.content + '<|im_end|>\\n' }}\
{% endfor %}\
{% if add_generation_prompt %}{{ '<|im_start|>assistant\\n' }}{% endif %}";

const LLAMA3: &str = "{{ bos_token }}{% for message in messages %}\
{{ '<|start_header_id|>' + message.role + '<|end_header_id|>\\n\\n' + message.content | trim + '<|eot_id|>' }}\
{% endfor %}\
{% if add_generation_prompt %}{{ '<|start_header_id|>assistant<|end_header_id|>\\n\\n' }}{% endif %}";

const ZEPHYR: &str = "{% for message in messages %}\
{{ '<|' + message.role + '|>\\n' + message.content + eos_token + '\\n' }}\
{% endfor %}\
{% if add_generation_prompt %}{{ '<|assistant|>\\n' }}{% endif %}";

fn builtin(name: &str) -> Option<(&'static str, &'static str, &'static str)> {
    // (source, bos, eos)
    match name {
        "chatml" => Some((CHATML, "", "")),
        "llama3" => Some((LLAMA3, "<|begin_of_text|>", "<|eot_id|>")),
        "zephyr" => Some((ZEPHYR, "", "</s>")),
        _ => None,
    }
}

fn raise_exception(msg: String) -> Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, msg))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

impl std::fmt::Debug for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTemplate")
            .field("bos_token", &self.bos_token)
            .field("eos_token", &self.eos_token)
            .finish_non_exhaustive()
    }
}

impl ChatTemplate {
    /// Accepts a built-in template name or raw Jinja source.
    pub fn new(name_or_source: &str) -> Result<Self, ServiceError> {
        match builtin(name_or_source) {
            Some((source, bos, eos)) => Self::from_source(source.to_string(), bos, eos),
            None => Self::from_source(name_or_source.to_string(), "", ""),
        }
    }

    pub fn from_source(
        source: String,
        bos_token: &str,
        eos_token: &str,
    ) -> Result<Self, ServiceError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_function("raise_exception", raise_exception);
        env.add_template_owned(TEMPLATE_NAME, source)
            .map_err(|e| ServiceError::Template(format!("invalid template syntax: {e}")))?;

        Ok(Self {
            env,
            bos_token: bos_token.to_string(),
            eos_token: eos_token.to_string(),
        })
    }

    pub fn render(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let tmpl = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| ServiceError::Template(e.to_string()))?;
        tmpl.render(context! {
            messages => messages,
            add_generation_prompt => true,
            bos_token => &self.bos_token,
            eos_token => &self.eos_token,
        })
        .map_err(|e| ServiceError::InvalidRequest(format!("failed to apply chat template: {e}")))
    }
}

fn invalid_content() -> ServiceError {
    ServiceError::InvalidRequest("Invalid 'content' type".into())
}

/// Flattens OpenAI messages into role/content pairs and renders them.
pub fn format_chat(template: &ChatTemplate, messages: &[Value]) -> Result<String, ServiceError> {
    let chat = messages
        .iter()
        .map(|msg| {
            let role = value_or_default(msg, "role", String::new());
            let content = match msg.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|part| part.get("text"))
                    .map(|text| text.as_str().ok_or_else(invalid_content))
                    .collect::<Result<Vec<_>, _>>()?
                    .join("\n"),
                Some(_) => return Err(invalid_content()),
                None => return Err(ServiceError::InvalidRequest("Missing 'content'".into())),
            };
            Ok(ChatMessage { role, content })
        })
        .collect::<Result<Vec<_>, _>>()?;

    template.render(&chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chatml_renders_with_generation_prompt() {
        let template = ChatTemplate::new("chatml").unwrap();
        let prompt = format_chat(&template, &[json!({ "role": "user", "content": "hi" })]).unwrap();
        assert_eq!(
            prompt,
            "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn text_parts_are_joined_with_newlines() {
        let template = ChatTemplate::new("{% for m in messages %}[{{ m.content }}]{% endfor %}")
            .unwrap();
        let messages = [json!({
            "role": "user",
            "content": [
                { "type": "text", "text": "first" },
                { "type": "other" },
                { "type": "text", "text": "second" },
            ],
        })];
        assert_eq!(format_chat(&template, &messages).unwrap(), "[first\nsecond]");
    }

    #[test]
    fn bad_content_is_rejected() {
        let template = ChatTemplate::new("chatml").unwrap();
        let missing = format_chat(&template, &[json!({ "role": "user" })]).unwrap_err();
        assert!(missing.to_string().contains("Missing 'content'"));
        let wrong = format_chat(&template, &[json!({ "role": "user", "content": 3 })]).unwrap_err();
        assert!(wrong.to_string().contains("Invalid 'content' type"));
    }

    #[test]
    fn non_string_text_part_is_rejected() {
        let template = ChatTemplate::new("chatml").unwrap();
        let messages = [json!({
            "role": "user",
            "content": [{ "type": "text", "text": 42 }],
        })];
        let err = format_chat(&template, &messages).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert!(err.to_string().contains("Invalid 'content' type"));
    }

    #[test]
    fn raise_exception_surfaces_as_invalid_request() {
        let template =
            ChatTemplate::new("{{ raise_exception('roles must alternate') }}").unwrap();
        let err = format_chat(&template, &[json!({ "role": "user", "content": "x" })]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert!(err.to_string().contains("roles must alternate"));
    }

    #[test]
    fn invalid_source_fails_to_compile() {
        assert!(matches!(
            ChatTemplate::new("{% for %}"),
            Err(ServiceError::Template(_))
        ));
    }
}
