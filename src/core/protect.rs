//! Reversible shielding of LaTeX spans from the Markdown renderer.
//!
//! Raw `$`/`\[` delimiters are reinterpreted by the Markdown grammar (as
//! emphasis, escapes, or literal text), so equations are swapped for opaque
//! tokens immediately before rendering and swapped back immediately after.
//! Tokens wrap the base64 of the span content in sentinel markers that no
//! Markdown construct can match, which also makes protection idempotent:
//! the inline/display patterns cannot fire inside an existing token.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    DisplayMath,
    InlineMath,
}

/// A tokenized region of text. The token must not survive into final
/// output; `restore` replaces it with `raw` again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedSpan {
    pub kind: SpanKind,
    pub raw: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct ProtectedText {
    pub text: String,
    pub spans: Vec<ProtectedSpan>,
}

fn display_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\$\$(.*?)\$\$").expect("display math pattern"))
}

fn display_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\\\[(.*?)\\\]").expect("display bracket pattern"))
}

fn inline_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([^\$\n]+?)\$").expect("inline math pattern"))
}

fn inline_paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\\(([^\\]+?)\\\)").expect("inline paren pattern"))
}

fn display_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"LATEX_DISPLAY_([A-Za-z0-9+/=]+)_LATEX_DISPLAY").expect("display token pattern")
    })
}

fn inline_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"LATEX_INLINE_([A-Za-z0-9+/=]+)_LATEX_INLINE").expect("inline token pattern")
    })
}

fn make_token(kind: SpanKind, raw: &str) -> String {
    let encoded = BASE64.encode(raw);
    match kind {
        SpanKind::DisplayMath => format!("LATEX_DISPLAY_{encoded}_LATEX_DISPLAY"),
        SpanKind::InlineMath => format!("LATEX_INLINE_{encoded}_LATEX_INLINE"),
    }
}

fn tokenize(text: &str, re: &Regex, kind: SpanKind, spans: &mut Vec<ProtectedSpan>) -> String {
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let token = make_token(kind, raw);
        spans.push(ProtectedSpan {
            kind,
            raw: raw.to_string(),
            token: token.clone(),
        });
        token
    })
    .into_owned()
}

/// Replace every LaTeX span in `text` with an opaque token.
///
/// Display delimiters are scanned before inline ones: the inline `$...$`
/// pattern is a subset match of an unprotected `$$...$$` block and would
/// fragment it otherwise.
pub fn protect(text: &str) -> ProtectedText {
    let mut spans = Vec::new();
    let text = tokenize(text, display_dollar_re(), SpanKind::DisplayMath, &mut spans);
    let text = tokenize(&text, display_bracket_re(), SpanKind::DisplayMath, &mut spans);
    let text = tokenize(&text, inline_dollar_re(), SpanKind::InlineMath, &mut spans);
    let text = tokenize(&text, inline_paren_re(), SpanKind::InlineMath, &mut spans);
    ProtectedText { text, spans }
}

fn restore_kind(text: &str, re: &Regex, kind: SpanKind, spans: &[ProtectedSpan]) -> String {
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let token = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if let Some(span) = spans.iter().find(|s| s.token == token) {
            return wrap_raw(kind, &span.raw);
        }
        let encoded = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match BASE64.decode(encoded) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(raw) => wrap_raw(kind, &raw),
                // Undecodable content: keep the token verbatim rather than
                // corrupting the message.
                Err(_) => token.to_string(),
            },
            Err(_) => token.to_string(),
        }
    })
    .into_owned()
}

fn wrap_raw(kind: SpanKind, raw: &str) -> String {
    match kind {
        SpanKind::DisplayMath => format!("$${raw}$$"),
        SpanKind::InlineMath => format!("${raw}$"),
    }
}

/// Replace every protection token in `text` with its original span,
/// re-wrapped in `$`/`$$` delimiters.
///
/// Tokens found in `spans` restore from the recorded raw content; any other
/// token decodes from its embedded base64. A token that fails to decode is
/// left in place verbatim.
pub fn restore(text: &str, spans: &[ProtectedSpan]) -> String {
    let text = restore_kind(text, display_token_re(), SpanKind::DisplayMath, spans);
    restore_kind(&text, inline_token_re(), SpanKind::InlineMath, spans)
}
