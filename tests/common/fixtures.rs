//! Listing page fixtures

use serde_json::{Value, json};

/// A valid search hit for `reference`
pub fn hit(reference: &str) -> Value {
    json!({
        "item": {
            "reference": reference,
            "price": 14990,
            "customerReference": "PRO-42",
            "vehicle": {
                "make": "PEUGEOT",
                "model": "308",
                "year": 2020,
                "mileage": 35000,
                "energy": "DIESEL",
                "gearbox": "MANUAL"
            }
        }
    })
}

/// A hit missing its price
pub fn hit_without_price(reference: &str) -> Value {
    let mut hit = hit(reference);
    if let Some(item) = hit.get_mut("item").and_then(Value::as_object_mut) {
        item.remove("price");
    }
    hit
}

/// Listing page with `hits` in its preloaded state and a result card for
/// each reference in `linked`
pub fn listing_page(hits: &[Value], linked: &[&str]) -> String {
    let state = json!({"search": {"total": hits.len(), "hits": hits}});
    let cards: String = linked
        .iter()
        .map(|reference| {
            format!(
                r#"<div class="searchCard" data-tracking-meta='{{"classified_ref": "{reference}"}}'>
  <a href="/auto-occasion-annonce-{reference}.html">listing</a>
</div>
"#
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<script>window.__PRELOADED_STATE_LISTING__ = {state};</script>
</head>
<body>
{cards}</body>
</html>"#
    )
}

/// Listing page where every reference has a valid hit and a card
pub fn simple_page(references: &[&str]) -> String {
    let hits: Vec<Value> = references.iter().map(|r| hit(r)).collect();
    listing_page(&hits, references)
}
