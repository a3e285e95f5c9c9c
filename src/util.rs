//! Small shared helpers.

use url::Url;

/// Normalize a collected item URL by dropping its query and fragment.
///
/// Listing pages decorate item links with tracking parameters that would
/// defeat deduplication. Unparseable input is returned untouched.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.into()
        }
        Err(_) => raw.to_string(),
    }
}

/// Collapse internal whitespace runs (including newlines) to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_query_and_fragment() {
        assert_eq!(
            normalize_url("https://example.com/item/m123?ref=search&pos=4#photos"),
            "https://example.com/item/m123"
        );
    }

    #[test]
    fn normalize_keeps_unparseable_input() {
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn collapse_flattens_newlines() {
        assert_eq!(collapse_whitespace("  Vintage\n Camera \t Body "), "Vintage Camera Body");
    }
}
