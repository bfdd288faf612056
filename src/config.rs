use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use tracing::warn;

use crate::{error::ServiceError, logging::LogFormat, template::ChatTemplate};

const DEFAULT_TEMPLATE: &str = "chatml";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Name reported by `/v1/models` and used for embeddings without a `model`.
    pub model_alias: String,
    /// Built-in template name or inline Jinja source.
    pub chat_template: String,
    pub chat_template_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            model_alias: "default".to_string(),
            chat_template: DEFAULT_TEMPLATE.to_string(),
            chat_template_path: None,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = match lookup("SERVER_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|err| anyhow::anyhow!("invalid SERVER_ADDR {raw:?}: {err}"))?,
            None => defaults.listen_addr,
        };

        let model_alias = lookup("MODEL_ALIAS")
            .filter(|alias| !alias.is_empty())
            .unwrap_or(defaults.model_alias);
        let chat_template = lookup("CHAT_TEMPLATE")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(defaults.chat_template);
        let chat_template_path = lookup("CHAT_TEMPLATE_PATH").map(PathBuf::from);

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => LogFormat::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown LOG_FORMAT, using text");
                LogFormat::Text
            }),
            None => defaults.log_format,
        };

        Ok(Self {
            listen_addr,
            model_alias,
            chat_template,
            chat_template_path,
            log_format,
        })
    }

    /// Compiles the configured chat template. A template file wins over
    /// `chat_template`.
    pub fn build_chat_template(&self) -> Result<ChatTemplate, ServiceError> {
        match &self.chat_template_path {
            Some(path) => {
                let source = fs::read_to_string(path)?;
                ChatTemplate::from_source(source, "", "")
            }
            None => ChatTemplate::new(&self.chat_template),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.model_alias, "default");
        assert_eq!(config.chat_template, "chatml");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.build_chat_template().is_ok());
    }

    #[test]
    fn values_are_read_from_environment() {
        let config = config(&[
            ("MODEL_ALIAS", "llama"),
            ("CHAT_TEMPLATE", "zephyr"),
            ("LOG_FORMAT", "json"),
            ("SERVER_ADDR", "0.0.0.0:9000"),
        ])
        .unwrap();
        assert_eq!(config.model_alias, "llama");
        assert_eq!(config.chat_template, "zephyr");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.listen_addr.port(), 9000);
    }

    #[test]
    fn process_environment_loads() {
        let config = AppConfig::from_env().unwrap();
        assert!(!config.model_alias.is_empty());
        assert!(!config.chat_template.is_empty());
    }

    #[test]
    fn unknown_log_format_falls_back_to_text() {
        let config = config(&[("LOG_FORMAT", "xml")]).unwrap();
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        assert!(config(&[("SERVER_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn missing_template_file_is_an_io_error() {
        let config = config(&[("CHAT_TEMPLATE_PATH", "/nonexistent/template.jinja")]).unwrap();
        assert!(matches!(
            config.build_chat_template(),
            Err(ServiceError::Io(_))
        ));
    }
}
