//! Detail-page assembly: one rendered document in, one product record out.
//!
//! Field problems stay field problems here. A price that matched but did not
//! parse downgrades to `None` with a diagnostic; only a missing title (or a
//! price nowhere on the page, variants included) fails the item.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use scraper::Html;

use crate::browser::pool::SessionLease;
use crate::error::ScrapeError;
use crate::extract;
use crate::fetch::PageFetcher;
use crate::models::{FieldOutcome, ItemStatus, Price, ScrapedItem, Variant, VariantGroup};
use crate::selectors::{fields, SelectorSnapshot, SiteRules};
use crate::util::collapse_whitespace;

/// Option group synthesized for pages without variant structure, so every
/// item reaches consumers in the one-product/many-variants shape.
const DEFAULT_OPTION_NAME: &str = "Title";
const DEFAULT_OPTION_VALUE: &str = "Default Title";

/// Substrings that mark non-product imagery.
const IMAGE_NOISE: &[&str] = &["icon", "logo", "blank", "placeholder"];

/// Assembles full product records from detail pages.
#[derive(Debug, Clone, Default)]
pub struct ItemAssembler {
    fetcher: PageFetcher,
}

impl ItemAssembler {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self { fetcher }
    }

    /// Navigate to a detail page and assemble its record.
    pub async fn assemble(
        &self,
        lease: &mut SessionLease,
        snapshot: &SelectorSnapshot,
        site: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<ScrapedItem, ScrapeError> {
        let rules = snapshot
            .site(site)
            .ok_or_else(|| ScrapeError::Config(format!("no selector rules for site `{site}`")))?;
        let html = self.fetcher.navigate(lease, rules, url, timeout).await?;
        assemble_document(rules, url, &html)
    }
}

/// Assemble a record from an already rendered document.
///
/// Deterministic: identical input yields an identical record.
pub fn assemble_document(
    rules: &SiteRules,
    url: &str,
    html: &str,
) -> Result<ScrapedItem, ScrapeError> {
    let dom = Html::parse_document(html);
    let mut diagnostics = BTreeMap::new();

    let title = match extract::resolve_field(rules, &dom, fields::TITLE) {
        Some(m) => {
            diagnostics.insert(fields::TITLE.to_string(), FieldOutcome::Matched(m.index));
            collapse_whitespace(&m.value)
        }
        None => {
            return Err(ScrapeError::NotFound {
                url: url.to_string(),
                field: fields::TITLE.to_string(),
            })
        }
    };

    let (price, price_resolved) = match extract::resolve_field(rules, &dom, fields::PRICE) {
        Some(m) => match parse_price(&m.value, &rules.currency) {
            Some(p) => {
                diagnostics.insert(fields::PRICE.to_string(), FieldOutcome::Matched(m.index));
                (Some(p), true)
            }
            None => {
                diagnostics.insert(fields::PRICE.to_string(), FieldOutcome::ParseFailed(m.index));
                (None, true)
            }
        },
        None => {
            diagnostics.insert(fields::PRICE.to_string(), FieldOutcome::NotFound);
            (None, false)
        }
    };

    // Status falls back to full document text, where sold-out banners live
    // on sites that render no dedicated status element.
    let status_text = match extract::resolve_field(rules, &dom, fields::STATUS) {
        Some(m) => {
            diagnostics.insert(fields::STATUS.to_string(), FieldOutcome::Matched(m.index));
            m.value
        }
        None => {
            if !rules.field(fields::STATUS).is_empty() {
                diagnostics.insert(fields::STATUS.to_string(), FieldOutcome::NotFound);
            }
            extract::document_text(&dom)
        }
    };
    let status = map_status(rules, &status_text);

    let images = match extract::resolve_chain_values(rules.field(fields::IMAGES), &dom, Some("src"))
    {
        Some(found) => {
            diagnostics.insert(fields::IMAGES.to_string(), FieldOutcome::Matched(found.index));
            filter_images(found.values)
        }
        None => {
            if !rules.field(fields::IMAGES).is_empty() {
                diagnostics.insert(fields::IMAGES.to_string(), FieldOutcome::NotFound);
            }
            Vec::new()
        }
    };

    let description = resolve_optional(rules, &dom, fields::DESCRIPTION, &mut diagnostics)
        .unwrap_or_default();
    let condition = resolve_optional(rules, &dom, fields::CONDITION, &mut diagnostics);

    let (variant_groups, mut variants) = extract_variants(rules, &dom);

    if !price_resolved && !variants.iter().any(|v| v.price.is_some()) {
        return Err(ScrapeError::NotFound {
            url: url.to_string(),
            field: fields::PRICE.to_string(),
        });
    }

    let (variant_groups, variants) = if variants.is_empty() {
        // No variant structure on the page: synthesize the implicit single
        // variant, using the condition as its option value when known.
        let value = condition
            .clone()
            .unwrap_or_else(|| DEFAULT_OPTION_VALUE.to_string());
        let group = VariantGroup {
            name: DEFAULT_OPTION_NAME.to_string(),
            values: vec![value.clone()],
        };
        let variant = Variant {
            option_values: BTreeMap::from([(DEFAULT_OPTION_NAME.to_string(), value)]),
            sku: None,
            price: price.clone(),
        };
        (vec![group], vec![variant])
    } else {
        for variant in &mut variants {
            if variant.price.is_none() {
                variant.price = price.clone();
            }
        }
        (variant_groups, variants)
    };

    Ok(ScrapedItem {
        url: url.to_string(),
        title,
        price,
        description,
        condition,
        images,
        status,
        variant_groups,
        variants,
        diagnostics,
    })
}

fn resolve_optional(
    rules: &SiteRules,
    dom: &Html,
    field: &str,
    diagnostics: &mut BTreeMap<String, FieldOutcome>,
) -> Option<String> {
    if rules.field(field).is_empty() {
        return None;
    }
    match extract::resolve_field(rules, dom, field) {
        Some(m) => {
            diagnostics.insert(field.to_string(), FieldOutcome::Matched(m.index));
            Some(m.value)
        }
        None => {
            diagnostics.insert(field.to_string(), FieldOutcome::NotFound);
            None
        }
    }
}

/// Parse a displayed price into an integer amount plus currency.
///
/// Strips grouping commas; recognizes JPY markers (`¥`, `￥`, `円`) and a few
/// western symbols, defaulting to the site currency otherwise.
pub fn parse_price(text: &str, default_currency: &str) -> Option<Price> {
    static AMOUNT: OnceLock<Regex> = OnceLock::new();
    let re = AMOUNT.get_or_init(|| Regex::new(r"(\d[\d,]*)").unwrap());

    let caps = re.captures(text)?;
    let amount: i64 = caps[1].replace(',', "").parse().ok()?;

    let currency = if text.contains('¥') || text.contains('￥') || text.contains('円') {
        "JPY"
    } else if text.contains('$') {
        "USD"
    } else if text.contains('€') {
        "EUR"
    } else {
        default_currency
    };

    Some(Price::new(amount, currency))
}

/// Map status text through the site's ordered substring table.
fn map_status(rules: &SiteRules, text: &str) -> ItemStatus {
    for (needle, status) in &rules.status_map {
        if text.contains(needle.as_str()) {
            return *status;
        }
    }
    ItemStatus::Unknown
}

fn filter_images(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| v.starts_with("http"))
        .filter(|v| {
            let lower = v.to_lowercase();
            !IMAGE_NOISE.iter().any(|noise| lower.contains(noise))
        })
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// One selectable value inside an option group, with per-value overrides
/// when the page exposes them as data attributes.
#[derive(Debug, Clone)]
struct OptionValue {
    label: String,
    sku: Option<String>,
    price: Option<Price>,
}

/// Pull option groups off the page and expand every combination of values
/// into a concrete variant.
fn extract_variants(rules: &SiteRules, dom: &Html) -> (Vec<VariantGroup>, Vec<Variant>) {
    let group_chain = rules.field(fields::VARIANT_GROUP);
    let name_chain = rules.field(fields::VARIANT_NAME);
    let values_chain = rules.field(fields::VARIANT_VALUES);

    let containers = group_chain
        .iter()
        .map(|selector| extract::select_document(dom, selector))
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    let mut groups: Vec<(String, Vec<OptionValue>)> = Vec::new();
    for (position, container) in containers.into_iter().enumerate() {
        let name = name_chain
            .iter()
            .find_map(|selector| {
                extract::select_in(container, selector)
                    .into_iter()
                    .find_map(|el| extract::element_value(el, selector.attr.as_deref()))
            })
            .map(|n| collapse_whitespace(&n))
            .unwrap_or_else(|| format!("Option {}", position + 1));

        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for selector in values_chain {
            for el in extract::select_in(container, selector) {
                let Some(label) = extract::element_value(el, selector.attr.as_deref()) else {
                    continue;
                };
                let label = collapse_whitespace(&label);
                if label.is_empty() || !seen.insert(label.clone()) {
                    continue;
                }
                let sku = el
                    .value()
                    .attr("data-sku")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let price = el
                    .value()
                    .attr("data-price")
                    .and_then(|p| parse_price(p, &rules.currency));
                values.push(OptionValue { label, sku, price });
            }
            if !values.is_empty() {
                break;
            }
        }

        if !values.is_empty() {
            groups.push((name, values));
        }
    }

    if groups.is_empty() {
        return (Vec::new(), Vec::new());
    }

    // Cartesian expansion, first group varying slowest so variants come out
    // in page order.
    let mut combos: Vec<Vec<&OptionValue>> = vec![Vec::new()];
    for (_, values) in &groups {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push(value);
                next.push(extended);
            }
        }
        combos = next;
    }

    let variants = combos
        .into_iter()
        .map(|combo| {
            let option_values = groups
                .iter()
                .zip(&combo)
                .map(|((name, _), value)| (name.clone(), value.label.clone()))
                .collect();
            let sku = combo.iter().rev().find_map(|v| v.sku.clone());
            let price = combo.iter().rev().find_map(|v| v.price.clone());
            Variant {
                option_values,
                sku,
                price,
            }
        })
        .collect();

    let variant_groups = groups
        .into_iter()
        .map(|(name, values)| VariantGroup {
            name,
            values: values.into_iter().map(|v| v.label).collect(),
        })
        .collect();

    (variant_groups, variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::SelectorRegistry;

    fn rules() -> SiteRules {
        let registry = SelectorRegistry::new();
        let snapshot = registry
            .load_str(
                r#"{"shop": {
                    "status_map": [["売り切れ", "sold"], ["購入手続きへ", "available"]],
                    "fields": {
                        "title": ["h1.name"],
                        "price": ["[data-testid='price']"],
                        "description": [".description"],
                        "condition": [".condition"],
                        "images": [{"css": "img.photo", "attr": "src"}],
                        "variant_group": [".option-group"],
                        "variant_name": [".option-name"],
                        "variant_values": ["button.option-value"]
                    }
                }}"#,
            )
            .unwrap();
        snapshot.site("shop").unwrap().clone()
    }

    const PLAIN_ITEM: &str = "<html><body>\
        <h1 class='name'>Vintage\n  Film Camera</h1>\
        <div data-testid='price'>¥12,800</div>\
        <div class='description'>Working condition, minor wear.</div>\
        <img class='photo' src='https://img.example/main.jpg'>\
        <img class='photo' src='https://img.example/main.jpg'>\
        <img class='photo' src='https://img.example/logo.png'>\
        <img class='photo' src='/relative/2.jpg'>\
        <button>購入手続きへ</button>\
        </body></html>";

    #[test]
    fn assembles_a_plain_item() {
        let item = assemble_document(&rules(), "https://shop.example/item/1", PLAIN_ITEM).unwrap();

        assert_eq!(item.title, "Vintage Film Camera");
        assert_eq!(item.price, Some(Price::new(12800, "JPY")));
        assert_eq!(item.status, ItemStatus::Available);
        assert_eq!(item.description, "Working condition, minor wear.");
        // logo filtered, duplicate and non-http entries dropped
        assert_eq!(item.images, vec!["https://img.example/main.jpg"]);
        assert_eq!(
            item.diagnostics.get(fields::TITLE),
            Some(&FieldOutcome::Matched(0))
        );
    }

    #[test]
    fn assembly_is_deterministic() {
        let rules = rules();
        let a = assemble_document(&rules, "https://shop.example/item/1", PLAIN_ITEM).unwrap();
        let b = assemble_document(&rules, "https://shop.example/item/1", PLAIN_ITEM).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_title_fails_the_item() {
        let err = assemble_document(
            &rules(),
            "https://shop.example/item/1",
            "<html><body><div data-testid='price'>¥100</div></body></html>",
        )
        .unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound { field, .. } if field == "title"));
    }

    #[test]
    fn unparsable_price_downgrades_instead_of_failing() {
        let html = "<html><body>\
            <h1 class='name'>Mystery Box</h1>\
            <div data-testid='price'>price on request</div>\
            <div class='option-group'><span class='option-name'>Size</span>\
            <button class='option-value' data-price='¥500'>S</button></div>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();

        assert_eq!(item.price, None);
        assert_eq!(
            item.diagnostics.get(fields::PRICE),
            Some(&FieldOutcome::ParseFailed(0))
        );
        // the variant carries the only price
        assert_eq!(item.variants[0].price, Some(Price::new(500, "JPY")));
    }

    #[test]
    fn missing_price_everywhere_fails_the_item() {
        let err = assemble_document(
            &rules(),
            "https://shop.example/item/1",
            "<html><body><h1 class='name'>No Price Here</h1></body></html>",
        )
        .unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound { field, .. } if field == "price"));
    }

    #[test]
    fn sold_marker_in_body_text_maps_to_sold() {
        let html = "<html><body>\
            <h1 class='name'>Sold Thing</h1>\
            <div data-testid='price'>¥3,000</div>\
            <p>この商品は売り切れました</p>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();
        assert_eq!(item.status, ItemStatus::Sold);
    }

    #[test]
    fn unmapped_status_text_is_unknown() {
        let html = "<html><body>\
            <h1 class='name'>Ambiguous</h1>\
            <div data-testid='price'>¥3,000</div>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();
        assert_eq!(item.status, ItemStatus::Unknown);
    }

    #[test]
    fn variant_combinations_expand_cartesian() {
        let html = "<html><body>\
            <h1 class='name'>Team Jersey</h1>\
            <div data-testid='price'>¥5,000</div>\
            <div class='option-group'><span class='option-name'>Color</span>\
              <button class='option-value'>Red</button>\
              <button class='option-value'>Blue</button></div>\
            <div class='option-group'><span class='option-name'>Size</span>\
              <button class='option-value'>S</button>\
              <button class='option-value'>M</button>\
              <button class='option-value'>L</button></div>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();

        assert_eq!(item.variant_groups.len(), 2);
        assert_eq!(item.variant_groups[0].name, "Color");
        assert_eq!(item.variant_groups[1].values, vec!["S", "M", "L"]);
        assert_eq!(item.variants.len(), 6);

        let first = &item.variants[0];
        assert_eq!(first.option_values.get("Color").unwrap(), "Red");
        assert_eq!(first.option_values.get("Size").unwrap(), "S");
        // variants without their own price inherit the item price
        assert_eq!(first.price, Some(Price::new(5000, "JPY")));
    }

    #[test]
    fn variant_values_carry_sku_and_price_overrides() {
        let html = "<html><body>\
            <h1 class='name'>Sneaker</h1>\
            <div data-testid='price'>¥9,000</div>\
            <div class='option-group'><span class='option-name'>Size</span>\
              <button class='option-value' data-sku='SNK-26' data-price='¥9,500'>26cm</button>\
              <button class='option-value'>27cm</button></div>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();

        assert_eq!(item.variants.len(), 2);
        assert_eq!(item.variants[0].sku.as_deref(), Some("SNK-26"));
        assert_eq!(item.variants[0].price, Some(Price::new(9500, "JPY")));
        assert_eq!(item.variants[1].sku, None);
        assert_eq!(item.variants[1].price, Some(Price::new(9000, "JPY")));
    }

    #[test]
    fn pages_without_variants_get_the_implicit_default() {
        let item = assemble_document(&rules(), "https://shop.example/item/1", PLAIN_ITEM).unwrap();

        assert_eq!(item.variant_groups.len(), 1);
        assert_eq!(item.variant_groups[0].name, "Title");
        assert_eq!(item.variants.len(), 1);
        assert_eq!(
            item.variants[0].option_values.get("Title").unwrap(),
            "Default Title"
        );
        assert_eq!(item.variants[0].price, Some(Price::new(12800, "JPY")));
    }

    #[test]
    fn condition_becomes_the_default_variant_value() {
        let html = "<html><body>\
            <h1 class='name'>Used Game</h1>\
            <div data-testid='price'>¥1,200</div>\
            <span class='condition'>中古：良い</span>\
            </body></html>";
        let item = assemble_document(&rules(), "https://shop.example/item/1", html).unwrap();

        assert_eq!(item.condition.as_deref(), Some("中古：良い"));
        assert_eq!(
            item.variants[0].option_values.get("Title").unwrap(),
            "中古：良い"
        );
    }

    #[test]
    fn price_parsing_handles_common_formats() {
        assert_eq!(parse_price("¥12,800", "JPY"), Some(Price::new(12800, "JPY")));
        assert_eq!(parse_price("12,800円", "USD"), Some(Price::new(12800, "JPY")));
        assert_eq!(parse_price("$49", "JPY"), Some(Price::new(49, "USD")));
        assert_eq!(parse_price("1980", "JPY"), Some(Price::new(1980, "JPY")));
        assert_eq!(parse_price("sold out", "JPY"), None);
        assert_eq!(parse_price("", "JPY"), None);
    }
}
