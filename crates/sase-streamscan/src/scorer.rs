//! Window scorers
//!
//! The engine only needs `score(window) -> probability`. Neural backends plug
//! in through [`Scorer`]; [`EntropyScorer`] is a deterministic heuristic used
//! when no model is deployed.

use async_trait::async_trait;
use memchr::memmem;
use thiserror::Error;

/// Scoring backend failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScorerError {
    #[error("model not loaded")]
    NotLoaded,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Malware probability for a byte window
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score a window of at most `window_size` bytes. Must be deterministic
    /// for identical input.
    async fn score(&self, window: &[u8]) -> Result<f64, ScorerError>;

    /// Backend name for logs and status
    fn name(&self) -> &str;
}

/// Shannon entropy in bits per byte
#[inline]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &freq {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

const SUSPICIOUS_TOKENS: &[&[u8]] = &[
    b"VirtualAlloc",
    b"CreateRemoteThread",
    b"WriteProcessMemory",
    b"powershell -enc",
    b"WScript.Shell",
    b"cmd.exe /c",
    b"/bin/sh -c",
    b"eval(base64_decode",
    b"FromBase64String",
];

/// Heuristic scorer: packed/encrypted content, executable headers and
/// injection-style API names raise the score.
pub struct EntropyScorer {
    /// Entropy (bits/byte) above which content looks packed
    entropy_floor: f64,
    token_weight: f64,
    header_weight: f64,
}

impl EntropyScorer {
    pub fn new() -> Self {
        Self {
            entropy_floor: 6.0,
            token_weight: 0.2,
            header_weight: 0.15,
        }
    }

    fn entropy_score(&self, window: &[u8]) -> f64 {
        let entropy = shannon_entropy(window);
        ((entropy - self.entropy_floor) / (8.0 - self.entropy_floor)).clamp(0.0, 1.0) * 0.5
    }

    fn header_score(&self, window: &[u8]) -> f64 {
        let is_pe = window.starts_with(b"MZ");
        let is_elf = window.starts_with(b"\x7fELF");
        if is_pe || is_elf {
            self.header_weight
        } else {
            0.0
        }
    }

    fn token_score(&self, window: &[u8]) -> f64 {
        let hits = SUSPICIOUS_TOKENS
            .iter()
            .filter(|t| memmem::find(window, t).is_some())
            .count();
        hits as f64 * self.token_weight
    }
}

impl Default for EntropyScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scorer for EntropyScorer {
    async fn score(&self, window: &[u8]) -> Result<f64, ScorerError> {
        if window.is_empty() {
            return Ok(0.0);
        }
        let score =
            self.entropy_score(window) + self.header_score(window) + self.token_score(window);
        Ok(score.clamp(0.0, 1.0))
    }

    fn name(&self) -> &str {
        "entropy-heuristic"
    }
}
