mod request;
mod response;
mod stream;
mod types;

/// Model name reported when a completion request does not name one.
pub const DEFAULT_OAICOMPAT_MODEL: &str = "gpt-3.5-turbo-0613";

pub use request::{normalize_completion, normalize_embedding};
pub use response::{assemble_completion, assemble_embedding, gen_chatcmplid, gen_cmplid};
pub use stream::{CompletionStream, DONE_EVENT, sse_done_event, sse_error_event, sse_event};
pub use types::{
    AssistantMessage, Choice, ChoiceBody, CompatMode, CompletionResponse, Delta, DraftStats,
    EmbeddingData, EmbeddingResponse, EmbeddingUsage, EmbeddingVector, EngineResult,
    FinishReason, GenerationRequest, Timings, Usage,
};
