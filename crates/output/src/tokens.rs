//! Token Counting
//!
//! Budgets are expressed in LLM tokens. Callers with access to a real
//! tokenizer plug it in through [`TokenCounter`]; otherwise the
//! four-bytes-per-token heuristic is used.

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Approximate counter: one token per `bytes_per_token` bytes of UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    bytes_per_token: usize,
}

impl HeuristicTokenCounter {
    pub const DEFAULT_BYTES_PER_TOKEN: usize = 4;

    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BYTES_PER_TOKEN)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.len() / self.bytes_per_token
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Count tokens with the default heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    HeuristicTokenCounter::default().count(text)
}
