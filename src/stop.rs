//! Stop-string detection over a growing output buffer.
//!
//! Text is tracked as raw bytes because a single token may carry only part
//! of a multi-byte character. Nothing is released to the client while its
//! tail could still turn into a stop string or an incomplete character.

use crate::codec::incomplete_utf8_suffix;

/// Where a generation stands after the latest appended token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    Running,
    /// The last `n` bytes are a prefix of some stop string and are held back.
    PartialMatch(usize),
    StoppedByWord,
    StoppedByEos,
    StoppedByLimit,
}

impl StopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StopState::StoppedByWord | StopState::StoppedByEos | StopState::StoppedByLimit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMatchKind {
    Full,
    Partial,
}

/// Returns the offset in `text` where a suffix equal to a non-empty prefix of
/// `stop` begins, preferring the longest prefix.
///
/// A full trailing occurrence of `stop` yields `text.len() - stop.len()`.
pub fn find_partial_stop_string(stop: &str, text: &[u8]) -> Option<usize> {
    let stop = stop.as_bytes();
    let last = *text.last()?;
    if stop.is_empty() {
        return None;
    }
    (0..stop.len())
        .rev()
        .find(|&idx| stop[idx] == last && text.ends_with(&stop[..=idx]))
        .map(|idx| text.len() - idx - 1)
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Earliest match of any stop string in `text`, together with that string.
///
/// `Full` only searches the window the last appended piece could have
/// completed; `Partial` looks for a stop-string prefix at the very end.
pub fn find_stopping_strings<'a>(
    text: &[u8],
    stops: &'a [String],
    last_piece_len: usize,
    kind: StopMatchKind,
) -> Option<(usize, &'a str)> {
    let mut best: Option<(usize, &'a str)> = None;
    for word in stops.iter().filter(|w| !w.is_empty()) {
        let pos = match kind {
            StopMatchKind::Full => {
                let window = word.len() + last_piece_len;
                find_bytes(text, word.as_bytes(), text.len().saturating_sub(window))
            }
            StopMatchKind::Partial => find_partial_stop_string(word, text),
        };
        if let Some(pos) = pos {
            if best.is_none_or(|(current, _)| pos < current) {
                best = Some((pos, word.as_str()));
            }
        }
    }
    best
}

/// Per-generation stop bookkeeping. One instance per response; not shared.
#[derive(Debug, Clone)]
pub struct StopMatcher {
    stops: Vec<String>,
    n_predict: i64,
    text: Vec<u8>,
    sent: usize,
    n_decoded: usize,
    state: StopState,
    stopping_word: Option<String>,
}

impl StopMatcher {
    /// `n_predict <= 0` means unbounded.
    pub fn new(stops: Vec<String>, n_predict: i64) -> Self {
        Self {
            stops,
            n_predict,
            text: Vec::new(),
            sent: 0,
            n_decoded: 0,
            state: StopState::Running,
            stopping_word: None,
        }
    }

    pub fn state(&self) -> StopState {
        self.state
    }

    pub fn n_decoded(&self) -> usize {
        self.n_decoded
    }

    pub fn stopping_word(&self) -> Option<&str> {
        self.stopping_word.as_deref()
    }

    /// Everything generated so far, with a matched stop string cut off.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.text).into_owned()
    }

    /// Appends one token's bytes and re-evaluates the stop conditions.
    ///
    /// The end-of-sequence token contributes no text.
    pub fn push(&mut self, piece: &[u8], is_eos: bool) -> StopState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.n_decoded += 1;
        if !is_eos {
            self.text.extend_from_slice(piece);
        }

        let unsent = &self.text[self.sent..];
        if let Some((pos, word)) =
            find_stopping_strings(unsent, &self.stops, piece.len(), StopMatchKind::Full)
        {
            self.stopping_word = Some(word.to_string());
            self.text.truncate(self.sent + pos);
            self.state = StopState::StoppedByWord;
            return self.state;
        }

        if self.n_predict > 0 && self.n_decoded as i64 >= self.n_predict {
            self.state = StopState::StoppedByLimit;
            return self.state;
        }

        if is_eos {
            self.state = StopState::StoppedByEos;
            return self.state;
        }

        self.state = match find_stopping_strings(unsent, &self.stops, 0, StopMatchKind::Partial) {
            Some((pos, _)) => StopState::PartialMatch(unsent.len() - pos),
            None => StopState::Running,
        };
        self.state
    }

    /// Releases the text that can no longer become part of a stop string.
    ///
    /// Once the generation is stopped the whole remainder is released.
    pub fn take_ready(&mut self) -> String {
        let end = match self.state {
            StopState::PartialMatch(held) => self.text.len() - held,
            _ => self.text.len(),
        };
        let end = if self.state.is_terminal() {
            end
        } else {
            end - incomplete_utf8_suffix(&self.text[self.sent..end])
        };
        if end <= self.sent {
            return String::new();
        }
        let ready = String::from_utf8_lossy(&self.text[self.sent..end]).into_owned();
        self.sent = end;
        ready
    }

    /// Releases everything not yet sent, held-back text included.
    pub fn take_all(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.text[self.sent..]).into_owned();
        self.sent = self.text.len();
        rest
    }
}
