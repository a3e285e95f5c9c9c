//! Versioned selector configuration.
//!
//! Sites are configured as `site → field → [selector, ...]` fallback chains
//! in JSON. A load compiles and validates every selector up front and
//! produces an immutable [`SelectorSnapshot`]; running jobs hold their
//! snapshot for their whole duration, so editing the config file only
//! affects jobs started after the next load.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScrapeError;
use crate::models::ItemStatus;

/// Field names the extraction pipeline gives meaning to.
pub mod fields {
    pub const TITLE: &str = "title";
    pub const PRICE: &str = "price";
    pub const DESCRIPTION: &str = "description";
    pub const CONDITION: &str = "condition";
    pub const IMAGES: &str = "images";
    pub const STATUS: &str = "status";
    /// Anchor elements on a listing page that point at item detail pages.
    pub const ITEM_LINKS: &str = "item_links";
    /// Element that only exists once client-side rendering has completed.
    pub const READY: &str = "ready";
    /// Containers of one option group each (e.g. a color picker).
    pub const VARIANT_GROUP: &str = "variant_group";
    /// The group's display name, resolved inside a group container.
    pub const VARIANT_NAME: &str = "variant_name";
    /// The selectable values, resolved inside a group container.
    pub const VARIANT_VALUES: &str = "variant_values";
}

/// Fields every configured site must cover with at least one selector.
pub const MANDATORY_FIELDS: &[&str] = &[fields::TITLE, fields::PRICE];

/// One matcher in a field's fallback chain, as written in config.
///
/// Accepted JSON forms:
/// - `"h1.item-name"`: exact CSS selector, reads text content
/// - `{"css": "img.photo", "attr": "src"}`: exact CSS, reads an attribute
/// - `{"class_contains": "itemName"}`: matches any element whose class list
///   contains a class with that substring, which survives the hashed
///   suffixes of generated class names (`styles_itemName__x3Fq9`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Css(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        css: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_contains: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attr: Option<String>,
    },
}

/// Compiled matcher ready to run against a parsed document.
#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    Css(Selector),
    ClassContains(String),
}

/// A validated selector plus the attribute it reads, if any.
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub(crate) matcher: Matcher,
    pub(crate) attr: Option<String>,
}

fn compile(site: &str, field: &str, spec: &SelectorSpec) -> Result<CompiledSelector, ScrapeError> {
    let bad = |msg: String| ScrapeError::Config(format!("{site}.{field}: {msg}"));

    let (css, class_contains, attr) = match spec {
        SelectorSpec::Css(css) => (Some(css.as_str()), None, None),
        SelectorSpec::Detailed {
            css,
            class_contains,
            attr,
        } => (css.as_deref(), class_contains.as_deref(), attr.clone()),
    };

    let matcher = match (css, class_contains) {
        (Some(css), None) => Matcher::Css(
            Selector::parse(css).map_err(|e| bad(format!("invalid selector `{css}`: {e}")))?,
        ),
        (None, Some(sub)) if !sub.is_empty() => Matcher::ClassContains(sub.to_string()),
        (None, Some(_)) => return Err(bad("empty class_contains".into())),
        _ => return Err(bad("selector needs exactly one of `css` or `class_contains`".into())),
    };

    Ok(CompiledSelector { matcher, attr })
}

/// Raw per-site configuration as deserialized from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Currency applied when a price carries no recognizable symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Substrings a collected item link must contain to be kept.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_domains: Vec<String>,
    /// Ordered `[substring, status]` pairs; first contained substring wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_map: Vec<(String, ItemStatus)>,
    #[serde(default)]
    pub fields: HashMap<String, Vec<SelectorSpec>>,
}

/// Compiled, validated rules for one site.
#[derive(Debug, Clone)]
pub struct SiteRules {
    pub currency: String,
    pub valid_domains: Vec<String>,
    pub status_map: Vec<(String, ItemStatus)>,
    fields: HashMap<String, Vec<CompiledSelector>>,
}

impl SiteRules {
    /// The fallback chain for a field; empty when unconfigured.
    pub fn field(&self, name: &str) -> &[CompiledSelector] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

const DEFAULT_CURRENCY: &str = "JPY";

/// Immutable copy of all site rules, taken at job start.
#[derive(Debug)]
pub struct SelectorSnapshot {
    version: u64,
    sites: HashMap<String, SiteRules>,
}

impl SelectorSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn site(&self, site: &str) -> Option<&SiteRules> {
        self.sites.get(site)
    }

    pub fn site_names(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }
}

/// Loads selector config files into versioned, immutable snapshots.
#[derive(Debug, Default)]
pub struct SelectorRegistry {
    loads: AtomicU64,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a JSON config document.
    pub fn load_str(&self, json: &str) -> Result<Arc<SelectorSnapshot>, ScrapeError> {
        let raw: HashMap<String, SiteConfig> = serde_json::from_str(json)
            .map_err(|e| ScrapeError::Config(format!("parse: {e}")))?;
        self.build_snapshot(raw)
    }

    /// Load and validate a JSON config file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<SelectorSnapshot>, ScrapeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ScrapeError::Config(format!("read {}: {e}", path.display())))?;
        self.load_str(&json)
    }

    fn build_snapshot(
        &self,
        raw: HashMap<String, SiteConfig>,
    ) -> Result<Arc<SelectorSnapshot>, ScrapeError> {
        let mut sites = HashMap::with_capacity(raw.len());

        for (site, config) in raw {
            for field in MANDATORY_FIELDS {
                if config.fields.get(*field).map_or(true, Vec::is_empty) {
                    return Err(ScrapeError::Config(format!(
                        "site `{site}` has no selectors for mandatory field `{field}`"
                    )));
                }
            }

            let mut fields = HashMap::with_capacity(config.fields.len());
            for (field, specs) in &config.fields {
                let compiled = specs
                    .iter()
                    .map(|spec| compile(&site, field, spec))
                    .collect::<Result<Vec<_>, _>>()?;
                fields.insert(field.clone(), compiled);
            }

            sites.insert(
                site,
                SiteRules {
                    currency: config
                        .currency
                        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    valid_domains: config.valid_domains,
                    status_map: config.status_map,
                    fields,
                },
            );
        }

        let version = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        info!(version, sites = sites.len(), "loaded selector snapshot");
        Ok(Arc::new(SelectorSnapshot { version, sites }))
    }
}
