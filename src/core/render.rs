//! The answer render pipeline: Markdown to HTML with LaTeX spans and
//! figure references kept intact.
//!
//! The pipeline is an ordered list of named passes, each total over
//! arbitrary input:
//!
//! 1. model-label extraction
//! 2. figure resolution ([`figures::resolve`], before any rendering)
//! 3. text normalization (whitespace, bullets, fence info strings)
//! 4. LaTeX protection ([`protect::protect`])
//! 5. Markdown rendering (pulldown-cmark)
//! 6. LaTeX restoration ([`protect::restore`])
//! 7. figure placeholder substitution ([`figures::substitute`])
//! 8. HTML retagging
//!
//! Protection sits immediately around the Markdown render so the grammar
//! never sees raw `$`/`\[` delimiters it could reinterpret.

use std::sync::OnceLock;

use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

use crate::core::figures::{self, FigureCatalog, FigureMatch};
use crate::core::protect;

/// A fully processed bot answer ready for the render sink.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    /// Final HTML, safe to hand to the display layer.
    pub html: String,
    /// Raw text with the model label removed; what feedback and history
    /// records key on.
    pub clean_text: String,
    pub model_label: Option<String>,
    pub figures: Vec<FigureMatch>,
}

fn model_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[Respuesta generada con ([^\]]+)\]").expect("model label pattern")
    })
}

/// Pull the `[Respuesta generada con <model>]` tag out of the answer.
pub fn extract_model_label(text: &str) -> (String, Option<String>) {
    let label = model_label_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    if label.is_none() {
        return (text.to_string(), None);
    }
    let cleaned = model_label_re().replace_all(text, "").trim().to_string();
    (cleaned, label)
}

/// Normalize the raw answer text before rendering.
///
/// Fenced code blocks pass through untouched except for language
/// defaulting: an opening fence with no info string becomes ```` ```text ````
/// so every block downstream carries a `language-*` class.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            if !in_fence && info.trim().is_empty() {
                out.push_str(&line[..line.len() - trimmed.len()]);
                out.push_str("```text");
            } else {
                out.push_str(line);
            }
            in_fence = !in_fence;
            out.push('\n');
            continue;
        }
        if in_fence {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        out.push_str(&normalize_line(line));
        out.push('\n');
    }

    squeeze_blank_lines(&out)
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[•·*]\s+").expect("bullet pattern"))
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\)\s+").expect("ordinal pattern"))
}

fn normalize_line(line: &str) -> String {
    let collapsed: String = collapse_spaces(line);
    let trimmed = collapsed.trim_end().to_string();
    let line = bullet_re().replace(&trimmed, "- ").into_owned();
    ordinal_re().replace(&line, "$1. ").into_owned()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

fn squeeze_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options
}

fn render_markdown(text: &str) -> String {
    let parser = Parser::new_ext(text, markdown_options());
    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    out
}

fn code_language_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<pre class="bot-code-block"><code class="language-([A-Za-z0-9_+-]+)">"#)
            .expect("code language pattern")
    })
}

/// Attach `bot-*` classes to the rendered tags and annotate fenced code
/// blocks with their detected language.
fn retag(html: &str) -> String {
    let mut out = html.to_string();
    for level in 1..=6 {
        out = out.replace(
            &format!("<h{level}>"),
            &format!("<h{level} class=\"bot-heading\">"),
        );
    }
    for (from, to) in [
        ("<p>", "<p class=\"bot-paragraph\">"),
        ("<ul>", "<ul class=\"bot-list\">"),
        ("<ol>", "<ol class=\"bot-list-ordered\">"),
        ("<li>", "<li class=\"bot-list-item\">"),
        ("<strong>", "<strong class=\"bot-bold\">"),
        ("<em>", "<em class=\"bot-italic\">"),
        ("<code>", "<code class=\"bot-code\">"),
        ("<pre><code", "<pre class=\"bot-code-block\"><code"),
        ("<blockquote>", "<blockquote class=\"bot-quote\">"),
        ("<hr />", "<hr class=\"bot-separator\" />"),
        ("<table>", "<table class=\"bot-table\">"),
        ("<thead>", "<thead class=\"bot-table-head\">"),
        ("<tbody>", "<tbody class=\"bot-table-body\">"),
        ("<tr>", "<tr class=\"bot-table-row\">"),
        ("<th>", "<th class=\"bot-table-header\">"),
        ("<td>", "<td class=\"bot-table-cell\">"),
    ] {
        out = out.replace(from, to);
    }
    out = code_language_re()
        .replace_all(
            &out,
            "<pre class=\"bot-code-block\" data-language=\"$1\"><code class=\"language-$1\">",
        )
        .into_owned();
    out.replace("<p class=\"bot-paragraph\"></p>", "")
}

/// Run the full pipeline over a finished bot answer.
pub fn render_message(raw: &str, catalog: &FigureCatalog) -> RenderedMessage {
    let (clean_text, model_label) = extract_model_label(raw);
    let (marked, matches) = figures::resolve(&clean_text, catalog);
    let normalized = normalize(&marked);
    let protected = protect::protect(&normalized);
    let html = render_markdown(&protected.text);
    let html = protect::restore(&html, &protected.spans);
    let html = figures::substitute(&html, &matches);
    let html = retag(&html);
    RenderedMessage {
        html,
        clean_text,
        model_label,
        figures: matches,
    }
}

/// Light-weight render for the live chunk-accumulation display: Markdown
/// only, no figure or protection passes.
pub fn render_streaming(text: &str) -> String {
    render_markdown(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::core::figures::FigureAsset;

    fn catalog() -> FigureCatalog {
        let mut map = HashMap::new();
        map.insert("2.14".to_string(), "fig.eps".to_string());
        FigureCatalog::new(
            map,
            vec![FigureAsset {
                source_file: "fig.eps".to_string(),
                image_file: "fig.png".to_string(),
                width: 200,
                height: 100,
            }],
        )
    }

    #[test]
    fn extracts_model_label() {
        let (clean, label) =
            extract_model_label("Una respuesta.\n\n[Respuesta generada con llama3]");
        assert_eq!(label.as_deref(), Some("llama3"));
        assert_eq!(clean, "Una respuesta.");
    }

    #[test]
    fn missing_model_label_leaves_text_alone() {
        let (clean, label) = extract_model_label("Sin etiqueta.");
        assert!(label.is_none());
        assert_eq!(clean, "Sin etiqueta.");
    }

    #[test]
    fn normalize_defaults_fence_language() {
        let normalized = normalize("```\nlet x = 1;\n```\n");
        assert!(normalized.starts_with("```text\n"));
        assert!(normalized.contains("let x = 1;"));
    }

    #[test]
    fn normalize_keeps_explicit_fence_language() {
        let normalized = normalize("```rust\nlet x = 1;\n```\n");
        assert!(normalized.starts_with("```rust\n"));
    }

    #[test]
    fn normalize_leaves_code_interior_untouched() {
        let normalized = normalize("```python\nx   =   1\n```\n");
        assert!(normalized.contains("x   =   1"));
    }

    #[test]
    fn normalize_rewrites_bullets_and_ordinals() {
        let normalized = normalize("• primero\n2) segundo\n");
        assert!(normalized.contains("- primero"));
        assert!(normalized.contains("2. segundo"));
    }

    #[test]
    fn normalize_squeezes_blank_runs() {
        let normalized = normalize("a\n\n\n\nb\n");
        assert_eq!(normalized, "a\n\nb");
    }

    #[test]
    fn rendered_code_blocks_carry_language_annotations() {
        let message = render_message("```python\nprint(1)\n```", &FigureCatalog::default());
        assert!(message.html.contains("data-language=\"python\""));
        assert!(message
            .html
            .contains("<pre class=\"bot-code-block\" data-language=\"python\">"));
        assert!(message.html.contains("class=\"language-python\""));
    }

    #[test]
    fn rendered_headings_and_lists_are_retagged() {
        let message = render_message("# Titulo\n\n- uno\n- dos", &FigureCatalog::default());
        assert!(message.html.contains("<h1 class=\"bot-heading\">"));
        assert!(message.html.contains("<ul class=\"bot-list\">"));
        assert!(message.html.contains("<li class=\"bot-list-item\">"));
    }

    #[test]
    fn inline_code_keeps_bot_code_class() {
        let message = render_message("usa `let` aqui", &FigureCatalog::default());
        assert!(message.html.contains("<code class=\"bot-code\">let</code>"));
    }

    #[test]
    fn pipeline_preserves_math_and_resolves_figures_once() {
        let raw = "La $x^2$ es grande. Ver Figura 2.14 y Figura 2.14.";
        let message = render_message(raw, &catalog());

        // Equation restored verbatim after Markdown rendering.
        assert!(message.html.contains("$x^2$"));
        // One figure image, inserted at the first reference only.
        assert_eq!(message.figures.len(), 1);
        assert_eq!(message.html.matches("figure-container").count(), 1);
        assert!(!message.html.contains("PLACEHOLDER"));
        // The second reference keeps its bare label.
        assert!(message.html.matches("Figura 2.14").count() >= 2);
    }

    #[test]
    fn display_math_survives_rendering() {
        let message = render_message("Antes\n\n$$a = b + c$$\n\ndespues", &FigureCatalog::default());
        assert!(message.html.contains("$$a = b + c$$"));
    }

    #[test]
    fn no_protection_token_reaches_final_html() {
        let raw = "Mira $x_1$ y $$\\sum_{i=0}^n i$$ y `codigo`.";
        let message = render_message(raw, &FigureCatalog::default());
        assert!(!message.html.contains("LATEX_INLINE"));
        assert!(!message.html.contains("LATEX_DISPLAY"));
    }

    #[test]
    fn streaming_render_is_plain_markdown() {
        let html = render_streaming("**negrita** y `codigo`");
        assert!(html.contains("<strong>"));
        assert!(!html.contains("bot-bold"));
    }
}
