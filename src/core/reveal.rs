//! Word-by-word replay of a fully received answer.
//!
//! The answer is already complete when the reveal starts; this is a UX
//! replay, not real streaming. Markdown markers are stripped first so the
//! typewriter phase never flashes formatting syntax; the fully rendered
//! message replaces the plain-text reveal in one atomic swap when the
//! sequence is exhausted.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::core::constants::{REVEAL_BASE_DELAY_MS, REVEAL_JITTER_MS};

/// Inter-word pacing: a fixed base plus a uniform random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPacing {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for RevealPacing {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(REVEAL_BASE_DELAY_MS),
            jitter: Duration::from_millis(REVEAL_JITTER_MS),
        }
    }
}

impl RevealPacing {
    /// Sample the delay before the next word. Falls back to the base delay
    /// when no entropy is available.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        let mut bytes = [0u8; 8];
        match getrandom::fill(&mut bytes) {
            Ok(()) => self.base + Duration::from_millis(u64::from_le_bytes(bytes) % jitter_ms),
            Err(_) => self.base,
        }
    }
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern"))
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*(.*?)\*").expect("italic pattern"))
}

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`(.*?)`").expect("code pattern"))
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s*(.*)$").expect("header pattern"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(.*?)\]\(.*?\)").expect("link pattern"))
}

/// Strip Markdown formatting markers to plain text for the reveal phase.
/// The persisted message keeps full Markdown; only the typewriter display
/// uses this.
pub fn strip_markdown(text: &str) -> String {
    let text = bold_re().replace_all(text, "$1");
    let text = italic_re().replace_all(&text, "$1");
    let text = code_re().replace_all(&text, "$1");
    let text = header_re().replace_all(&text, "$1");
    link_re().replace_all(&text, "$1").into_owned()
}

/// A finite, non-restartable sequence of partial-reveal states over a
/// fully-known answer.
pub struct WordStreamer {
    words: Vec<String>,
    next: usize,
    revealed: String,
    pacing: RevealPacing,
}

impl WordStreamer {
    pub fn new(full_text: &str, pacing: RevealPacing) -> Self {
        let plain = strip_markdown(full_text);
        Self {
            words: plain.split_whitespace().map(str::to_string).collect(),
            next: 0,
            revealed: String::with_capacity(plain.len()),
            pacing,
        }
    }

    /// Append the next word and return the accumulated reveal state, or
    /// `None` once the sequence is exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        let word = self.words.get(self.next)?;
        if self.next > 0 {
            self.revealed.push(' ');
        }
        self.revealed.push_str(word);
        self.next += 1;
        Some(&self.revealed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.words.len()
    }

    /// Delay to sleep before revealing the next word.
    pub fn next_delay(&self) -> Duration {
        self.pacing.next_delay()
    }

    pub fn revealed(&self) -> &str {
        &self.revealed
    }
}
