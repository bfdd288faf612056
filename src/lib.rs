pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod json;
pub mod logging;
pub mod oai;
pub mod probs;
pub mod server;
pub mod stop;
pub mod template;

pub use config::AppConfig;
pub use engine::{CompletionEngine, ResultStream};
pub use error::{ErrorEnvelope, ErrorKind, ServiceError, format_error_response};
pub use generation::{GenerationTracker, TokenStep};
pub use oai::{EngineResult, GenerationRequest};
pub use server::{build_router, serve};
pub use template::ChatTemplate;
