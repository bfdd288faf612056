//! Token probability rendering in the three logprobs shapes clients expect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokenizers::decoders::DecoderWrapper;

pub type TokenId = i32;

/// Sentinel the engine uses for "no token".
pub const NO_TOKEN: TokenId = -1;

/// Turns a token id into the raw bytes it renders to.
pub trait TokenPieces {
    fn token_to_piece(&self, token: TokenId) -> Vec<u8>;
}

/// SentencePiece marker standing for a word-initial space.
const SPIECE_UNDERLINE: char = '\u{2581}';

impl TokenPieces for tokenizers::Tokenizer {
    /// Maps the vocabulary entry straight to bytes. Decoding one id at a time
    /// would strip the leading space a word-initial token carries.
    fn token_to_piece(&self, token: TokenId) -> Vec<u8> {
        let Some(vocab) = u32::try_from(token).ok().and_then(|id| self.id_to_token(id)) else {
            return Vec::new();
        };
        if let Some(byte) = parse_byte_token(&vocab) {
            return vec![byte];
        }
        match self.get_decoder() {
            Some(DecoderWrapper::ByteLevel(_)) => {
                vocab.chars().filter_map(byte_level_byte).collect()
            }
            _ => vocab.replace(SPIECE_UNDERLINE, " ").into_bytes(),
        }
    }
}

/// Byte-fallback vocab entries look like `<0xE2>`.
fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Inverse of the GPT-2 byte-to-unicode table used by byte-level BPE.
///
/// Printable Latin-1 bytes stand for themselves; the remaining 68 bytes are
/// shifted to U+0100.. in ascending byte order.
fn byte_level_byte(c: char) -> Option<u8> {
    let cp = u32::from(c);
    let byte = match cp {
        0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF => cp,
        0x100..=0x120 => cp - 0x100,
        0x121..=0x142 => cp - 0x121 + 0x7F,
        0x143 => 0xAD,
        _ => return None,
    };
    u8::try_from(byte).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenProb {
    pub tok: TokenId,
    pub prob: f32,
}

impl TokenProb {
    /// Sorts candidates by descending probability and keeps the best `k`.
    pub fn top_k(mut candidates: Vec<TokenProb>, k: usize) -> Vec<TokenProb> {
        candidates.sort_by(|a, b| b.prob.total_cmp(&a.prob));
        candidates.truncate(k);
        candidates
    }
}

/// Tokens produced in one step, each paired with its candidate list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionTokenOutput {
    toks: Vec<TokenId>,
    probss: Vec<Vec<TokenProb>>,
}

impl CompletionTokenOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tok: TokenId, probs: Vec<TokenProb>) {
        self.toks.push(tok);
        self.probss.push(probs);
    }

    pub fn is_empty(&self) -> bool {
        self.toks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.toks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &[TokenProb])> {
        self.toks
            .iter()
            .copied()
            .zip(self.probss.iter().map(Vec::as_slice))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbsFormat {
    /// `[{content, probs: [{tok_str, prob}]}]`
    Native,
    /// Legacy `/v1/completions` parallel arrays.
    Completion,
    /// `/v1/chat/completions` `{content: [...]}`.
    Chat,
}

/// Renders a token for output. A lone byte with the high bit set is half of a
/// multi-byte character and is shown as a `byte: \xHH` placeholder instead.
pub fn token_to_output_string<D>(decoder: &D, token: TokenId) -> String
where
    D: TokenPieces + ?Sized,
{
    if token == NO_TOKEN {
        return String::new();
    }
    let piece = decoder.token_to_piece(token);
    match piece.as_slice() {
        [byte] if byte & 0x80 == 0x80 => format!("byte: \\x{byte:x}"),
        _ => String::from_utf8_lossy(&piece).into_owned(),
    }
}

pub fn probs_to_json<D>(decoder: &D, outputs: &[CompletionTokenOutput], format: ProbsFormat) -> Value
where
    D: TokenPieces + ?Sized,
{
    let steps = outputs.iter().flat_map(CompletionTokenOutput::iter);
    match format {
        ProbsFormat::Chat => {
            let content: Vec<Value> = steps
                .map(|(tok, probs)| {
                    let token = token_to_output_string(decoder, tok);
                    let mut logprob = 1.0_f32;
                    let top_logprobs: Vec<Value> = probs
                        .iter()
                        .map(|p| {
                            let p_token = token_to_output_string(decoder, p.tok);
                            if p.tok == tok {
                                logprob = p.prob;
                            }
                            json!({
                                "token": p_token,
                                "logprob": p.prob,
                                "bytes": p_token.as_bytes(),
                            })
                        })
                        .collect();
                    json!({
                        "token": token,
                        "logprob": logprob,
                        "bytes": token.as_bytes(),
                        "top_logprobs": top_logprobs,
                    })
                })
                .collect();
            json!({ "content": content })
        }
        ProbsFormat::Completion => {
            let mut tokens = Vec::new();
            let mut token_logprobs = Vec::new();
            let mut top_logprobs = Vec::new();
            for (tok, probs) in steps {
                let mut logprob = 1.0_f32;
                let mut alternatives = Map::new();
                for p in probs {
                    // Alternatives rendering to the same text collapse into one key.
                    alternatives.insert(token_to_output_string(decoder, p.tok), json!(p.prob));
                    if p.tok == tok {
                        logprob = p.prob;
                    }
                }
                tokens.push(token_to_output_string(decoder, tok));
                token_logprobs.push(logprob);
                top_logprobs.push(if alternatives.is_empty() {
                    Value::Null
                } else {
                    Value::Object(alternatives)
                });
            }
            json!({
                "tokens": tokens,
                "token_logprobs": token_logprobs,
                "top_logprobs": top_logprobs,
            })
        }
        ProbsFormat::Native => Value::Array(
            steps
                .map(|(tok, probs)| {
                    let probs: Vec<Value> = probs
                        .iter()
                        .map(|p| {
                            json!({
                                "tok_str": token_to_output_string(decoder, p.tok),
                                "prob": p.prob,
                            })
                        })
                        .collect();
                    json!({
                        "content": token_to_output_string(decoder, tok),
                        "probs": probs,
                    })
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Fixed vocabulary used across the crate's tests.
    pub(crate) struct Vocab(pub HashMap<TokenId, Vec<u8>>);

    impl Vocab {
        pub(crate) fn new(entries: &[(TokenId, &[u8])]) -> Self {
            Self(entries.iter().map(|(id, b)| (*id, b.to_vec())).collect())
        }
    }

    impl TokenPieces for Vocab {
        fn token_to_piece(&self, token: TokenId) -> Vec<u8> {
            self.0.get(&token).cloned().unwrap_or_default()
        }
    }

    fn vocab() -> Vocab {
        Vocab::new(&[
            (1, &b"Hi"[..]),
            (2, &b" there"[..]),
            (3, &[0xe2_u8][..]),
            (4, &b"Hey"[..]),
            (5, &b"Hi"[..]),
        ])
    }

    fn output(steps: &[(TokenId, &[(TokenId, f32)])]) -> CompletionTokenOutput {
        let mut out = CompletionTokenOutput::new();
        for (tok, probs) in steps {
            out.push(
                *tok,
                probs.iter().map(|&(tok, prob)| TokenProb { tok, prob }).collect(),
            );
        }
        out
    }

    #[test]
    fn partial_byte_becomes_placeholder() {
        let v = vocab();
        assert_eq!(token_to_output_string(&v, 3), "byte: \\xe2");
        assert_eq!(token_to_output_string(&v, 1), "Hi");
        assert_eq!(token_to_output_string(&v, NO_TOKEN), "");
    }

    #[test]
    fn byte_tokens_are_parsed() {
        assert_eq!(parse_byte_token("<0xE2>"), Some(0xe2));
        assert_eq!(parse_byte_token("<0x0A>"), Some(0x0a));
        assert_eq!(parse_byte_token("hello"), None);
        assert_eq!(parse_byte_token("<0x123>"), None);
    }

    fn word_level(vocab: &[(&str, u32)], decoder: DecoderWrapper) -> tokenizers::Tokenizer {
        use tokenizers::models::wordlevel::WordLevel;

        let vocab = vocab.iter().map(|(t, id)| (t.to_string(), *id)).collect();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("<unk>".into())
            .build()
            .unwrap();
        let mut tokenizer = tokenizers::Tokenizer::new(model);
        tokenizer.with_decoder(decoder);
        tokenizer
    }

    #[test]
    fn sentencepiece_pieces_keep_word_spaces() {
        use tokenizers::pre_tokenizers::metaspace::Metaspace;

        let tokenizer = word_level(
            &[("<unk>", 0), ("\u{2581}Hello", 1), ("\u{2581}world", 2), ("<0x0A>", 3)],
            DecoderWrapper::Metaspace(Metaspace::new('\u{2581}', true)),
        );
        let text: Vec<u8> = [1, 2, 3]
            .into_iter()
            .flat_map(|id| tokenizer.token_to_piece(id))
            .collect();
        assert_eq!(text, b" Hello world\n");
        assert!(tokenizer.token_to_piece(99).is_empty());
        assert!(tokenizer.token_to_piece(NO_TOKEN).is_empty());
    }

    #[test]
    fn byte_level_pieces_map_back_to_bytes() {
        use tokenizers::pre_tokenizers::byte_level::ByteLevel;

        let tokenizer = word_level(
            &[("<unk>", 0), ("\u{120}Hello", 1), ("\u{10A}", 2), ("\u{C3}\u{A9}", 3)],
            DecoderWrapper::ByteLevel(ByteLevel::default()),
        );
        assert_eq!(tokenizer.token_to_piece(1), b" Hello");
        assert_eq!(tokenizer.token_to_piece(2), b"\n");
        assert_eq!(tokenizer.token_to_piece(3), "é".as_bytes());
    }

    #[test]
    fn byte_level_table_covers_every_byte() {
        let mapped: std::collections::HashSet<u8> = (0x21..=0x143_u32)
            .filter_map(char::from_u32)
            .filter_map(byte_level_byte)
            .collect();
        assert_eq!(mapped.len(), 256);
        assert_eq!(byte_level_byte('\u{100}'), Some(0x00));
        assert_eq!(byte_level_byte('\u{143}'), Some(0xAD));
        assert_eq!(byte_level_byte('a'), Some(b'a'));
    }

    #[test]
    fn top_k_orders_and_truncates() {
        let ranked = TokenProb::top_k(
            vec![
                TokenProb { tok: 1, prob: 0.1 },
                TokenProb { tok: 2, prob: 0.7 },
                TokenProb { tok: 3, prob: 0.2 },
            ],
            2,
        );
        assert_eq!(ranked.iter().map(|p| p.tok).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn chat_shape_uses_candidate_prob_when_chosen_token_is_listed() {
        let v = vocab();
        let outputs = [output(&[(1, &[(1, 0.5), (4, 0.25)]), (2, &[(4, 0.75)])])];
        let json = probs_to_json(&v, &outputs, ProbsFormat::Chat);
        let content = json["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["token"], "Hi");
        assert_eq!(content[0]["logprob"], 0.5);
        assert_eq!(content[0]["bytes"], json!([72, 105]));
        assert_eq!(content[0]["top_logprobs"][1]["token"], "Hey");
        assert_eq!(content[1]["logprob"], 1.0);
    }

    #[test]
    fn completion_shape_collapses_duplicate_alternative_text() {
        let v = vocab();
        let outputs = [output(&[(1, &[(1, 0.5), (5, 0.25)]), (2, &[])])];
        let json = probs_to_json(&v, &outputs, ProbsFormat::Completion);
        assert_eq!(json["tokens"], json!(["Hi", " there"]));
        assert_eq!(json["token_logprobs"], json!([0.5, 1.0]));
        assert_eq!(json["top_logprobs"][0], json!({ "Hi": 0.25 }));
        assert_eq!(json["top_logprobs"][1], Value::Null);
    }

    #[test]
    fn native_shape_lists_candidates() {
        let v = vocab();
        let outputs = [output(&[(3, &[(3, 0.5)])])];
        let json = probs_to_json(&v, &outputs, ProbsFormat::Native);
        assert_eq!(
            json,
            json!([{ "content": "byte: \\xe2", "probs": [{ "tok_str": "byte: \\xe2", "prob": 0.5 }] }])
        );
    }
}
