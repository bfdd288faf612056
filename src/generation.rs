//! Reassembles raw per-token engine output into [`EngineResult`] steps.

use std::{sync::Arc, time::Instant};

use tracing::debug;

use crate::{
    oai::{EngineResult, GenerationRequest, Timings},
    probs::{CompletionTokenOutput, ProbsFormat, TokenId, TokenPieces, TokenProb, probs_to_json},
    stop::{StopMatcher, StopState},
};

/// One sampled token with the candidates the sampler considered.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenStep {
    pub token: TokenId,
    pub candidates: Vec<TokenProb>,
    pub is_eos: bool,
}

impl TokenStep {
    pub fn new(token: TokenId) -> Self {
        Self {
            token,
            candidates: Vec::new(),
            is_eos: false,
        }
    }

    pub fn eos(token: TokenId) -> Self {
        Self {
            is_eos: true,
            ..Self::new(token)
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<TokenProb>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Tracks a single generation from its first sampled token to its stop.
pub struct GenerationTracker {
    decoder: Arc<dyn TokenPieces + Send + Sync>,
    matcher: StopMatcher,
    n_probs: usize,
    format: ProbsFormat,
    pending: CompletionTokenOutput,
    released: Vec<CompletionTokenOutput>,
    tokens_evaluated: u64,
    prompt_ms: f64,
    drafted: u64,
    draft_accepted: u64,
    started: Instant,
}

impl GenerationTracker {
    pub fn new(request: &GenerationRequest, decoder: Arc<dyn TokenPieces + Send + Sync>) -> Self {
        Self::with_format(request, decoder, request.probs_format())
    }

    pub fn with_format(
        request: &GenerationRequest,
        decoder: Arc<dyn TokenPieces + Send + Sync>,
        format: ProbsFormat,
    ) -> Self {
        Self {
            decoder,
            matcher: StopMatcher::new(request.stop(), request.n_predict()),
            n_probs: request.n_probs(),
            format,
            pending: CompletionTokenOutput::new(),
            released: Vec::new(),
            tokens_evaluated: 0,
            prompt_ms: 0.0,
            drafted: 0,
            draft_accepted: 0,
            started: Instant::now(),
        }
    }

    pub fn set_prompt_eval(&mut self, tokens_evaluated: u64, prompt_ms: f64) {
        self.tokens_evaluated = tokens_evaluated;
        self.prompt_ms = prompt_ms;
    }

    /// Speculative decoding: `drafted` tokens proposed, `accepted` of them kept.
    pub fn record_draft(&mut self, drafted: u64, accepted: u64) {
        self.drafted += drafted;
        self.draft_accepted += accepted;
    }

    pub fn state(&self) -> StopState {
        self.matcher.state()
    }

    pub fn is_finished(&self) -> bool {
        self.matcher.state().is_terminal()
    }

    /// Feeds one sampled token. Returns a partial result whenever text
    /// became safe to send.
    pub fn push(&mut self, step: TokenStep) -> Option<EngineResult> {
        if self.is_finished() {
            return None;
        }
        let piece = self.decoder.token_to_piece(step.token);
        let state = self.matcher.push(&piece, step.is_eos);
        if self.n_probs > 0 {
            self.pending
                .push(step.token, TokenProb::top_k(step.candidates, self.n_probs));
        }
        if state.is_terminal() {
            debug!(?state, n_decoded = self.matcher.n_decoded(), "generation stopped");
        }

        let text = self.matcher.take_ready();
        if text.is_empty() {
            return None;
        }
        Some(EngineResult {
            content: text,
            tokens_predicted: self.matcher.n_decoded() as u64,
            tokens_evaluated: self.tokens_evaluated,
            completion_probabilities: self.release_probs(),
            ..Default::default()
        })
    }

    fn release_probs(&mut self) -> Option<serde_json::Value> {
        if self.n_probs == 0 || self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        let json = probs_to_json(self.decoder.as_ref(), std::slice::from_ref(&batch), self.format);
        self.released.push(batch);
        Some(json)
    }

    /// Final result of the generation.
    ///
    /// Streaming callers get only text not yet released by [`push`](Self::push);
    /// otherwise the whole output. A generation the engine ended without a
    /// stop condition is reported as a length stop.
    pub fn finish(&mut self, streaming: bool) -> EngineResult {
        let state = self.matcher.state();
        let remainder = self.matcher.take_all();

        let (content, completion_probabilities) = if streaming {
            (remainder, self.release_probs())
        } else {
            self.release_probs();
            let probs = (self.n_probs > 0)
                .then(|| probs_to_json(self.decoder.as_ref(), &self.released, self.format));
            (self.matcher.text(), probs)
        };

        let n_decoded = self.matcher.n_decoded() as u64;
        let predicted_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let per_token_ms = if n_decoded > 0 {
            predicted_ms / n_decoded as f64
        } else {
            0.0
        };

        EngineResult {
            content,
            stopped_word: state == StopState::StoppedByWord,
            stopped_eos: state == StopState::StoppedByEos,
            stopped_limit: !matches!(state, StopState::StoppedByWord | StopState::StoppedByEos),
            stopping_word: self.matcher.stopping_word().map(str::to_string),
            tokens_predicted: n_decoded,
            tokens_evaluated: self.tokens_evaluated,
            timings: Timings {
                prompt_ms: self.prompt_ms,
                predicted_per_token_ms: per_token_ms,
                predicted_per_second: if per_token_ms > 0.0 {
                    1000.0 / per_token_ms
                } else {
                    0.0
                },
                drafted_n: (self.drafted > 0).then_some(self.drafted),
                drafted_accepted_p: (self.drafted > 0)
                    .then(|| self.draft_accepted as f64 / self.drafted as f64),
            },
            completion_probabilities,
            embedding: None,
        }
    }
}
