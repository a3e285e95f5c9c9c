//! Selector fallback resolution against a rendered document.
//!
//! A field's selectors are tried strictly in config order; the first one that
//! yields a non-empty trimmed value wins and its chain index is reported back
//! for diagnostics. There is no scoring across selectors; priority order in
//! the config is the whole policy.

use scraper::{ElementRef, Html};

use crate::selectors::{CompiledSelector, Matcher, SiteRules};

/// A resolved field value and the chain index of the selector that won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub value: String,
    pub index: usize,
}

/// All values produced by the first selector in a chain that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValues {
    pub values: Vec<String>,
    pub index: usize,
}

/// Attributes consulted when a `src` read comes up empty (lazy-loaded images).
const LAZY_SRC_FALLBACKS: &[&str] = &["data-src", "data-lazy"];

/// Run one compiled selector over a subtree.
pub(crate) fn select_in<'a>(
    scope: ElementRef<'a>,
    selector: &CompiledSelector,
) -> Vec<ElementRef<'a>> {
    match &selector.matcher {
        Matcher::Css(sel) => scope.select(sel).collect(),
        Matcher::ClassContains(sub) => scope
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().classes().any(|c| c.contains(sub.as_str())))
            .collect(),
    }
}

pub(crate) fn select_document<'a>(
    dom: &'a Html,
    selector: &CompiledSelector,
) -> Vec<ElementRef<'a>> {
    select_in(dom.root_element(), selector)
}

/// Read an element's value: an attribute when one is named, text otherwise.
pub(crate) fn element_value(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(name) => {
            let mut value = el
                .value()
                .attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if value.is_none() && name == "src" {
                value = LAZY_SRC_FALLBACKS.iter().find_map(|alt| {
                    el.value().attr(alt).map(str::trim).filter(|v| !v.is_empty())
                });
            }
            value.map(str::to_string)
        }
        None => {
            let text = el.text().collect::<String>();
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

/// Resolve one field against the document; first non-empty match wins.
pub fn resolve_field(rules: &SiteRules, dom: &Html, field: &str) -> Option<FieldMatch> {
    resolve_chain(rules.field(field), dom, None)
}

pub(crate) fn resolve_chain(
    chain: &[CompiledSelector],
    dom: &Html,
    default_attr: Option<&str>,
) -> Option<FieldMatch> {
    for (index, selector) in chain.iter().enumerate() {
        for el in select_document(dom, selector) {
            if let Some(value) = element_value(el, selector.attr.as_deref().or(default_attr)) {
                return Some(FieldMatch { value, index });
            }
        }
    }
    None
}

/// Resolve a multi-valued field: every value the winning selector produced,
/// in document order.
pub(crate) fn resolve_chain_values(
    chain: &[CompiledSelector],
    dom: &Html,
    default_attr: Option<&str>,
) -> Option<FieldValues> {
    for (index, selector) in chain.iter().enumerate() {
        let values: Vec<String> = select_document(dom, selector)
            .into_iter()
            .filter_map(|el| element_value(el, selector.attr.as_deref().or(default_attr)))
            .collect();
        if !values.is_empty() {
            return Some(FieldValues { values, index });
        }
    }
    None
}

/// Full visible text of the document, for body-text fallbacks.
pub(crate) fn document_text(dom: &Html) -> String {
    dom.root_element().text().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::{fields, SelectorRegistry};

    fn rules_for(config: &str) -> crate::selectors::SiteRules {
        let registry = SelectorRegistry::new();
        let snapshot = registry.load_str(config).unwrap();
        snapshot.site("shop").unwrap().clone()
    }

    #[test]
    fn first_matching_selector_wins_with_its_index() {
        let rules = rules_for(
            r#"{"shop": {"fields": {
                "title": [".missing-a", "h2.name", ".missing-c"],
                "price": ["p"]
            }}}"#,
        );
        let dom = Html::parse_document("<html><body><h2 class='name'>Blue Jacket</h2></body></html>");

        let m = resolve_field(&rules, &dom, fields::TITLE).unwrap();
        assert_eq!(m.value, "Blue Jacket");
        assert_eq!(m.index, 1);
    }

    #[test]
    fn exhausted_chain_resolves_to_none() {
        let rules = rules_for(
            r#"{"shop": {"fields": {"title": [".a", ".b"], "price": ["p"]}}}"#,
        );
        let dom = Html::parse_document("<html><body><span>nope</span></body></html>");
        assert!(resolve_field(&rules, &dom, fields::TITLE).is_none());
    }

    #[test]
    fn whitespace_only_matches_do_not_win() {
        let rules = rules_for(
            r#"{"shop": {"fields": {"title": [".empty", ".real"], "price": ["p"]}}}"#,
        );
        let dom = Html::parse_document(
            "<html><body><div class='empty'>   \n </div><div class='real'>Camera</div></body></html>",
        );

        let m = resolve_field(&rules, &dom, fields::TITLE).unwrap();
        assert_eq!(m.value, "Camera");
        assert_eq!(m.index, 1);
    }

    #[test]
    fn class_contains_survives_hashed_suffixes() {
        let rules = rules_for(
            r#"{"shop": {"fields": {
                "title": [{"class_contains": "itemName"}],
                "price": ["p"]
            }}}"#,
        );
        let dom = Html::parse_document(
            "<html><body><h1 class='styles_itemName__x3Fq9'>Rare Figure</h1></body></html>",
        );

        let m = resolve_field(&rules, &dom, fields::TITLE).unwrap();
        assert_eq!(m.value, "Rare Figure");
    }

    #[test]
    fn attribute_reads_fall_back_to_lazy_load_attrs() {
        let rules = rules_for(
            r#"{"shop": {"fields": {
                "title": ["h1"],
                "price": ["p"],
                "images": [{"css": "img.photo", "attr": "src"}]
            }}}"#,
        );
        let dom = Html::parse_document(
            "<html><body>\
             <img class='photo' src='' data-src='https://img.example/1.jpg'>\
             <img class='photo' src='https://img.example/2.jpg'>\
             </body></html>",
        );

        let values = resolve_chain_values(rules.field(fields::IMAGES), &dom, None).unwrap();
        assert_eq!(
            values.values,
            vec!["https://img.example/1.jpg", "https://img.example/2.jpg"]
        );
    }
}
