//! Per-response state for streamed completions.

use axum::response::sse::Event;

use crate::{
    error::ServiceError,
    oai::{CompletionResponse, EngineResult, GenerationRequest, assemble_completion},
};

/// Terminal payload of an OpenAI-style event stream.
pub const DONE_EVENT: &str = "[DONE]";

/// Turns a stream of engine steps into ordered response chunks.
///
/// Owned by a single response; feed it steps in generation order.
#[derive(Debug)]
pub struct CompletionStream {
    request: GenerationRequest,
    completion_id: String,
    first: bool,
    finished: bool,
}

impl CompletionStream {
    pub fn new(request: GenerationRequest, completion_id: String) -> Self {
        Self {
            request,
            completion_id,
            first: true,
            finished: false,
        }
    }

    pub fn completion_id(&self) -> &str {
        &self.completion_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn chunks(&mut self, result: &EngineResult) -> Vec<CompletionResponse> {
        if self.finished {
            return Vec::new();
        }
        let mut chunks = Vec::with_capacity(2);

        if self.request.mode.chat && self.first {
            chunks.push(self.assemble(&EngineResult::default(), true));
        }
        self.first = false;

        if result.is_finished() {
            // The terminal chat chunk has an empty delta, so pending text goes out first.
            if self.request.mode.chat && !result.content.is_empty() {
                let pending = EngineResult {
                    content: result.content.clone(),
                    completion_probabilities: result.completion_probabilities.clone(),
                    ..Default::default()
                };
                chunks.push(self.assemble(&pending, false));
                let mut last = result.clone();
                last.content.clear();
                last.completion_probabilities = None;
                chunks.push(self.assemble(&last, false));
            } else {
                chunks.push(self.assemble(result, false));
            }
            self.finished = true;
        } else if !result.content.is_empty() || result.completion_probabilities.is_some() {
            chunks.push(self.assemble(result, false));
        }
        chunks
    }

    fn assemble(&self, result: &EngineResult, first: bool) -> CompletionResponse {
        assemble_completion(&self.request, result, &self.completion_id, true, first)
    }
}

pub fn sse_event(chunk: &CompletionResponse) -> Result<Event, ServiceError> {
    Ok(Event::default().data(serde_json::to_string(chunk)?))
}

pub fn sse_error_event(err: &ServiceError) -> Event {
    let body = serde_json::json!({ "error": err.envelope() });
    Event::default().data(body.to_string())
}

pub fn sse_done_event() -> Event {
    Event::default().data(DONE_EVENT)
}
