//! Resolution of inline figure references against the textbook asset
//! catalog.
//!
//! Answers cite figures by label ("Figura 2.14"). Resolution joins two
//! tables shipped with the frontend assets: a figure-number to source-file
//! map (`mapa_figuras.json`) and a list of rendered image records
//! (`imagenes.json`). The first occurrence of each resolvable number gets a
//! placeholder inserted directly after the literal reference; the
//! placeholder is swapped for image HTML after Markdown rendering.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::constants::FIGURE_MAX_WIDTH;

/// One record from `imagenes.json`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FigureAsset {
    /// Source asset the figure map points at (an .eps file name).
    #[serde(rename = "archivo")]
    pub source_file: String,
    /// Rendered image served to the browser.
    #[serde(rename = "png")]
    pub image_file: String,
    #[serde(rename = "ancho")]
    pub width: u32,
    #[serde(rename = "alto")]
    pub height: u32,
}

/// A figure reference that resolved to a displayable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureMatch {
    pub figure_number: String,
    pub source_asset: String,
    pub image_file: String,
    pub width: u32,
    pub height: u32,
}

/// The two lookup tables joined during resolution.
#[derive(Debug, Clone, Default)]
pub struct FigureCatalog {
    map: HashMap<String, String>,
    assets: Vec<FigureAsset>,
}

impl FigureCatalog {
    pub fn new(map: HashMap<String, String>, assets: Vec<FigureAsset>) -> Self {
        Self { map, assets }
    }

    /// Load both catalog files. A missing or unreadable file yields an
    /// empty table instead of an error, matching the tolerant load of the
    /// frontend assets.
    pub fn load(map_path: &Path, assets_path: &Path) -> Self {
        let map = fs::read_to_string(map_path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        let assets = fs::read_to_string(assets_path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        Self { map, assets }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() || self.assets.is_empty()
    }

    /// Join the figure-number map against the asset index.
    fn find(&self, figure_number: &str) -> Option<FigureMatch> {
        let source = self.map.get(figure_number)?;
        let asset = self.assets.iter().find(|a| &a.source_file == source)?;
        Some(FigureMatch {
            figure_number: figure_number.to_string(),
            source_asset: source.clone(),
            image_file: asset.image_file.clone(),
            width: asset.width,
            height: asset.height,
        })
    }
}

fn figure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Figura\s+(\d+\.?\d*)").expect("figure pattern"))
}

fn placeholder_for(figure_number: &str) -> String {
    format!("[FIGURA_{figure_number}_PLACEHOLDER]")
}

/// Scan `text` for figure references and mark the first resolvable
/// occurrence of each number with a placeholder token.
///
/// Numbers with no map entry or no asset record are left untouched and do
/// not appear in the returned matches. Repeated references keep their bare
/// label; only the first gets the marker.
pub fn resolve(text: &str, catalog: &FigureCatalog) -> (String, Vec<FigureMatch>) {
    let mut marked = String::with_capacity(text.len());
    let mut matches = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_end = 0;

    for caps in figure_re().captures_iter(text) {
        let whole = caps.get(0).expect("match 0 always present");
        let number = caps.get(1).expect("figure number group").as_str();

        marked.push_str(&text[last_end..whole.end()]);
        last_end = whole.end();

        if seen.contains(number) {
            continue;
        }
        if let Some(found) = catalog.find(number) {
            marked.push_str(&placeholder_for(number));
            seen.insert(number.to_string());
            matches.push(found);
        }
    }
    marked.push_str(&text[last_end..]);

    (marked, matches)
}

/// HTML block substituted for a figure placeholder.
fn figure_html(figure: &FigureMatch) -> String {
    let display_width = figure.width.min(FIGURE_MAX_WIDTH);
    format!(
        concat!(
            "<div class=\"figure-container\">",
            "<img src=\"assets/figures/png/{image}\" ",
            "alt=\"Figura {number}\" class=\"figure-image\" ",
            "width=\"{width}\" />",
            "<div class=\"figure-caption\">Figura {number}</div>",
            "</div>"
        ),
        image = figure.image_file,
        number = figure.figure_number,
        width = display_width,
    )
}

/// Replace each placeholder in `html` with its figure image block.
///
/// A placeholder that is no longer present (the text was altered upstream)
/// is skipped silently.
pub fn substitute(html: &str, matches: &[FigureMatch]) -> String {
    let mut out = html.to_string();
    for figure in matches {
        let placeholder = placeholder_for(&figure.figure_number);
        if out.contains(&placeholder) {
            out = out.replacen(&placeholder, &figure_html(figure), 1);
        }
    }
    out
}
