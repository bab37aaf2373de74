//src/config.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ReportError;
use crate::types::{FilterSpec, SourceKind};

/// Top-level sections this crate understands. Anything else in an
/// override document is ignored.
const KNOWN_SECTIONS: [&str; 3] = ["filtering", "plotting", "report"];

/// Kraken rank codes by level name.
const RANKS: [(&str, &str); 8] = [
    ("domain", "D"),
    ("kingdom", "K"),
    ("phylum", "P"),
    ("class", "C"),
    ("order", "O"),
    ("family", "F"),
    ("genus", "G"),
    ("species", "S"),
];

/// Resolve a level given either by name ("species") or by code ("S").
pub fn rank_code(level: &str) -> Option<&'static str> {
    let level = level.trim();
    RANKS
        .iter()
        .find(|(name, code)| name.eq_ignore_ascii_case(level) || *code == level)
        .map(|(_, code)| *code)
}

/// The hard-coded default document.
pub fn default_document() -> Json {
    json!({
        "plotting": {
            "width": "container",
            "height": 400,
            "color_scheme": "dark2"
        },
        "filtering": {
            "kraken": {
                "level": "species",
                "cutoff": 0.01,
                "max_entries": 10,
                "virus_only": true
            },
            "kaiju": {
                "cutoff": 0.01,
                "max_entries": 10
            },
            "blast": {
                "cutoff": 0.0,
                "max_entries": 25
            },
            "fastp": {},
            "flagstat": {}
        },
        "report": {
            "title": "ReportHanter Report",
            "template": "fast",
            "theme": "modern",
            "header_color": "#04c273",
            "header_bg_color": "#011a01"
        }
    })
}

/// Recursive key-by-key merge. Objects merge, anything else in `overrides`
/// replaces the leaf in `base`. Neither input is modified.
pub fn deep_merge(base: &Json, overrides: &Json) -> Json {
    match (base, overrides) {
        (Json::Object(base_map), Json::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                let next = match base_map.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Json::Object(merged)
        }
        (_, replacement) => replacement.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlotWidth {
    Pixels(u32),
    /// Only "container" (fill the available width) is meaningful.
    Named(String),
}

/// Backend-agnostic size/style hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSettings {
    pub width: PlotWidth,
    pub height: u32,
    pub color_scheme: String,
}

/// Title and branding hints for the composed report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    pub title: String,
    pub template: String,
    pub theme: String,
    pub header_color: String,
    pub header_bg_color: String,
}

#[derive(Debug, Default, Deserialize)]
struct FilterEntry {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    cutoff: Option<f64>,
    #[serde(default)]
    max_entries: Option<usize>,
    #[serde(default)]
    virus_only: Option<bool>,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    filtering: BTreeMap<String, FilterEntry>,
    plotting: PlotSettings,
    report: ReportSettings,
}

/// Read-only, validated configuration. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    document: Json,
    filters: BTreeMap<SourceKind, FilterSpec>,
    plotting: PlotSettings,
    report: ReportSettings,
}

impl ResolvedConfig {
    /// Filter policy for `kind`; sources without an entry keep every row.
    pub fn filter_spec_for(&self, kind: SourceKind) -> FilterSpec {
        self.filters.get(&kind).cloned().unwrap_or_default()
    }

    pub fn plotting_defaults(&self) -> &PlotSettings {
        &self.plotting
    }

    pub fn report_settings(&self) -> &ReportSettings {
        &self.report
    }

    /// The merged document the typed view was built from.
    pub fn document(&self) -> &Json {
        &self.document
    }
}

/// Merge `overrides` over the defaults and validate the result.
pub fn resolve(overrides: Option<&Json>) -> Result<ResolvedConfig, ReportError> {
    let defaults = default_document();
    let document = match overrides {
        None => defaults,
        Some(Json::Object(map)) => {
            let mut known = serde_json::Map::new();
            for (key, value) in map {
                if KNOWN_SECTIONS.contains(&key.as_str()) {
                    known.insert(key.clone(), value.clone());
                } else {
                    log::warn!("Ignoring unrecognized configuration section '{}'", key);
                }
            }
            deep_merge(&defaults, &Json::Object(known))
        }
        Some(other) => {
            return Err(ReportError::Config(format!(
                "override document must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let parsed: Document = serde_json::from_value(document.clone())
        .map_err(|e| ReportError::Config(e.to_string()))?;

    let mut filters = BTreeMap::new();
    for (key, entry) in parsed.filtering {
        let kind = SourceKind::from_config_key(&key).ok_or_else(|| {
            ReportError::Config(format!("unknown source '{}' in filtering section", key))
        })?;
        filters.insert(kind, filter_spec(kind, &key, entry)?);
    }

    if let PlotWidth::Named(name) = &parsed.plotting.width {
        if name != "container" {
            return Err(ReportError::Config(format!(
                "plotting.width must be a pixel count or \"container\", got \"{}\"",
                name
            )));
        }
    }

    Ok(ResolvedConfig {
        document,
        filters,
        plotting: parsed.plotting,
        report: parsed.report,
    })
}

/// Resolve from override JSON text.
pub fn resolve_str(overrides: &str) -> Result<ResolvedConfig, ReportError> {
    let doc: Json = serde_json::from_str(overrides)
        .map_err(|e| ReportError::Config(format!("override document is not valid JSON: {}", e)))?;
    resolve(Some(&doc))
}

/// Read an override document from disk. This is the one read the caller
/// performs; `resolve` itself never touches the filesystem.
pub fn load_overrides<P: AsRef<Path>>(path: P) -> Result<Json, ReportError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        ReportError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ReportError::Config(format!("failed to load config file {}: {}", path.display(), e))
    })
}

fn filter_spec(kind: SourceKind, key: &str, entry: FilterEntry) -> Result<FilterSpec, ReportError> {
    let cutoff = entry.cutoff.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(ReportError::Config(format!(
            "filtering.{}.cutoff must be within [0, 1], got {}",
            key, cutoff
        )));
    }
    if entry.max_entries == Some(0) {
        return Err(ReportError::Config(format!(
            "filtering.{}.max_entries must be at least 1 (or null for no cap)",
            key
        )));
    }

    let level = match entry.level {
        None if kind == SourceKind::ClassifierA => {
            return Err(ReportError::Config(format!(
                "filtering.{}.level is required; expected one of {}",
                key,
                RANKS.map(|(name, _)| name).join(", ")
            )))
        }
        None => None,
        Some(_) if kind != SourceKind::ClassifierA => {
            return Err(ReportError::Config(format!(
                "filtering.{}.level is not supported for {}",
                key, kind
            )))
        }
        Some(level) => Some(
            rank_code(&level)
                .ok_or_else(|| {
                    ReportError::Config(format!(
                        "invalid taxonomy level '{}' for filtering.{}; expected one of {}",
                        level,
                        key,
                        RANKS.map(|(name, _)| name).join(", ")
                    ))
                })?
                .to_string(),
        ),
    };

    // An explicit domain wins over the virus_only shorthand.
    let domain = match (entry.domain, entry.virus_only) {
        (Some(domain), _) => Some(domain),
        (None, Some(true)) => Some("Viruses".to_string()),
        (None, _) => None,
    };

    Ok(FilterSpec {
        level,
        cutoff,
        max_entries: entry.max_entries,
        domain,
    })
}

fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
