//! Listings embedded in the page as preloaded application state.
//!
//! Listing pages carry their search results in an inline script:
//!
//! ```text
//! window.__PRELOADED_STATE_LISTING__ = { "search": { "hits": [ ... ] } };
//! ```
//!
//! Canonical links are not part of that state. They come from the result
//! cards: an `<a>` whose href contains `auto-occasion-annonce`, inside a
//! `div[data-tracking-meta]` whose JSON names the listing's `classified_ref`.

use crate::{Error, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

use super::{PageParser, ParsedPage};

const STATE_MARKER: &str = "window.__PRELOADED_STATE_LISTING__";
const LISTING_LINK_MARKER: &str = "auto-occasion-annonce";

/// Parser for listing pages with preloaded state
#[derive(Debug)]
pub struct PreloadedStateParser {
    base_url: Url,
    state_pattern: Regex,
    scripts: Selector,
    anchors: Selector,
}

impl PreloadedStateParser {
    /// Parser resolving relative listing links against `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config("base_url", format!("invalid base URL '{}': {}", base_url, e)))?;
        let state_pattern =
            Regex::new(r"(?s)window\.__PRELOADED_STATE_LISTING__\s*=\s*(\{.*\})\s*;\s*")
                .map_err(|e| Error::Other(format!("invalid state pattern: {}", e)))?;
        let scripts = Selector::parse("script")
            .map_err(|e| Error::Other(format!("invalid script selector: {}", e)))?;
        let anchors = Selector::parse("a[href]")
            .map_err(|e| Error::Other(format!("invalid anchor selector: {}", e)))?;

        Ok(Self {
            base_url,
            state_pattern,
            scripts,
            anchors,
        })
    }

    fn candidates(&self, document: &Html) -> Vec<Value> {
        let Some(script) = document
            .select(&self.scripts)
            .map(|script| script.text().collect::<String>())
            .find(|text| text.contains(STATE_MARKER))
        else {
            tracing::debug!("No preloaded state script on page");
            return Vec::new();
        };

        let Some(state) = self
            .state_pattern
            .captures(&script)
            .and_then(|captures| captures.get(1))
        else {
            tracing::debug!("Preloaded state script has no assignment");
            return Vec::new();
        };

        let mut state: Value = match serde_json::from_str(state.as_str()) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Preloaded state is not valid JSON");
                return Vec::new();
            }
        };

        match state.pointer_mut("/search/hits").map(Value::take) {
            Some(Value::Array(hits)) => hits,
            _ => {
                tracing::debug!("Preloaded state has no search hits");
                Vec::new()
            }
        }
    }

    fn links(&self, document: &Html) -> HashMap<String, String> {
        let mut links = HashMap::new();

        for anchor in document.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !href.contains(LISTING_LINK_MARKER) {
                continue;
            }
            let Some(reference) = tracking_reference(&anchor) else {
                continue;
            };
            match self.base_url.join(href) {
                Ok(url) => {
                    links.insert(reference, url.to_string());
                }
                Err(e) => {
                    tracing::debug!(href, error = %e, "Unresolvable listing link");
                }
            }
        }

        links
    }
}

/// `classified_ref` from the nearest enclosing `div[data-tracking-meta]`
fn tracking_reference(anchor: &ElementRef<'_>) -> Option<String> {
    let meta = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|element| element.value().name() == "div")
        .find_map(|element| element.value().attr("data-tracking-meta"))?;

    let meta: Value = serde_json::from_str(&meta.replace("&quot;", "\"")).ok()?;
    match meta.get("classified_ref")? {
        Value::String(reference) if !reference.is_empty() => Some(reference.clone()),
        Value::Number(reference) => Some(reference.to_string()),
        _ => None,
    }
}

impl PageParser for PreloadedStateParser {
    fn parse(&self, content: &str) -> ParsedPage {
        let document = Html::parse_document(content);
        ParsedPage {
            candidates: self.candidates(&document),
            links: self.links(&document),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<script>var analytics = {};</script>
<script>
window.__PRELOADED_STATE_LISTING__ = {"search": {"total": 2, "hits": [
  {"item": {"reference": "E101", "price": 12990, "vehicle": {"make": "RENAULT", "model": "CLIO", "year": 2019}}},
  {"item": {"reference": "E102", "price": 8500, "vehicle": {"make": "PEUGEOT", "model": "208", "year": 2016}}}
]}};
</script>
</head>
<body>
  <div class="card" data-tracking-meta='{"classified_ref": "E101", "position": 1}'>
    <div class="inner">
      <a href="/auto-occasion-annonce-69103456789.html">Renault Clio</a>
    </div>
  </div>
  <div data-tracking-meta="{&quot;classified_ref&quot;: &quot;E102&quot;}">
    <a href="https://www.lacentrale.fr/auto-occasion-annonce-69103450000.html">Peugeot 208</a>
    <a href="/listing?page=2">next</a>
  </div>
  <a href="/auto-occasion-annonce-orphan.html">orphan</a>
</body>
</html>"#;

    fn parser() -> PreloadedStateParser {
        PreloadedStateParser::new("https://www.lacentrale.fr").unwrap()
    }

    #[test]
    fn extracts_hits_and_links() {
        let parsed = parser().parse(PAGE);

        assert_eq!(parsed.candidates.len(), 2);
        assert_eq!(parsed.candidates[0]["item"]["reference"], "E101");
        assert_eq!(parsed.candidates[1]["item"]["vehicle"]["make"], "PEUGEOT");

        assert_eq!(parsed.links.len(), 2);
        assert_eq!(
            parsed.links["E101"],
            "https://www.lacentrale.fr/auto-occasion-annonce-69103456789.html"
        );
        assert_eq!(
            parsed.links["E102"],
            "https://www.lacentrale.fr/auto-occasion-annonce-69103450000.html"
        );
    }

    #[test]
    fn page_without_state_is_empty() {
        let parsed = parser().parse("<html><body><p>Access denied</p></body></html>");
        assert!(parsed.candidates.is_empty());
        assert!(parsed.links.is_empty());
    }

    #[test]
    fn malformed_state_is_empty() {
        let page = "<script>window.__PRELOADED_STATE_LISTING__ = {\"search\": [oops};</script>";
        assert!(parser().parse(page).candidates.is_empty());
    }

    #[test]
    fn state_without_hits_is_empty() {
        let page = "<script>window.__PRELOADED_STATE_LISTING__ = {\"search\": {\"total\": 0}};</script>";
        assert!(parser().parse(page).candidates.is_empty());
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = PreloadedStateParser::new("not a url").unwrap_err();
        assert!(err.kind().is_fatal());
    }
}
