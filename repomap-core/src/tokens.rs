//! Token counting capability

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

/// Maps a text span to an integer token estimate
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// `cl100k_base` BPE counter (GPT-4/Claude compatible)
#[derive(Debug, Default, Clone, Copy)]
pub struct TiktokenCounter;

/// Encoder is expensive to build; shared across all counters
static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

impl TiktokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Build the encoder ahead of parallel or latency-sensitive work
    pub fn warm() {
        bpe();
    }
}

fn bpe() -> Option<&'static CoreBPE> {
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match bpe() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            // Fallback: rough estimate of 4 chars per token
            None => HeuristicCounter::default().count_tokens(text),
        }
    }
}

/// Character-ratio estimate, for callers without a tokenizer
#[derive(Debug, Clone, Copy)]
pub struct HeuristicCounter {
    tokens_per_char: f64,
}

impl HeuristicCounter {
    pub fn new(tokens_per_char: f64) -> Self {
        Self {
            tokens_per_char: tokens_per_char.max(0.05),
        }
    }
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl TokenCounter for HeuristicCounter {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let estimated = (text.chars().count() as f64 * self.tokens_per_char) as usize;
        estimated.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_counts() {
        let text = "Hello, world!";
        let tokens = TiktokenCounter::new().count_tokens(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_heuristic_counts() {
        let counter = HeuristicCounter::default();
        assert_eq!(counter.count_tokens(""), 0);
        assert_eq!(counter.count_tokens("ab"), 1);
        assert_eq!(counter.count_tokens(&"x".repeat(40)), 10);
    }

    #[test]
    fn test_heuristic_ratio_floor() {
        let counter = HeuristicCounter::new(0.0);
        assert_eq!(counter.count_tokens(&"x".repeat(100)), 5);
    }
}
