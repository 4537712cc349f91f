//! Listing normalization and display.
//!
//! Venues return listings in one of two shapes:
//!
//! - nested: `{"id", "tg_id", "name", "price": "31.5", "floor_price",
//!   "owner_id", "attributes": [{"type": "model", "value": ..}, ..]}`
//! - flat: `{"gift_id": 123, "gift_num", "name", "price": 31.5,
//!   "model", "symbol", "backdrop"}`
//!
//! Both are folded into [`Item`]. Flat `model`/`symbol`/`backdrop` fields
//! become attributes of the same type.

use serde_json::Value;
use tracing::warn;

use crate::types::{Attribute, Item};
use crate::venue::VenueError;

const FLAT_ATTRIBUTES: [&str; 3] = ["model", "symbol", "backdrop"];

/// Render a JSON scalar as text. Objects, arrays and null yield `None`.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_text(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| scalar_text(obj.get(*k)))
        .filter(|s| !s.trim().is_empty())
}

/// Normalize one raw listing. `category` is the search key that produced it,
/// used when the listing does not name its own collection.
pub fn parse_item(raw: &Value, category: &str) -> Result<Item, VenueError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| VenueError::Malformed(format!("listing is not an object: {}", raw)))?;

    let id = first_text(obj, &["id", "gift_id", "nft_id"])
        .ok_or_else(|| VenueError::Malformed("listing without id".to_string()))?;

    let mut attributes: Vec<Attribute> = obj
        .get("attributes")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let kind = scalar_text(a.get("type"))?;
                    let value = scalar_text(a.get("value"))?;
                    Some(Attribute::new(kind, value))
                })
                .collect()
        })
        .unwrap_or_default();

    for kind in FLAT_ATTRIBUTES {
        if attributes.iter().any(|a| a.kind.eq_ignore_ascii_case(kind)) {
            continue;
        }
        if let Some(value) = first_text(obj, &[kind]) {
            attributes.push(Attribute::new(kind, value));
        }
    }

    Ok(Item {
        id,
        name: first_text(obj, &["name", "gift_name"]).unwrap_or_else(|| "?".to_string()),
        number: first_text(obj, &["tg_id", "gift_num", "number"]),
        price: first_text(obj, &["price"]),
        floor_price: first_text(obj, &["floor_price", "floorPrice"]),
        category: first_text(obj, &["collection", "category"])
            .unwrap_or_else(|| category.to_string()),
        attributes,
        owner_ref: obj.get("owner_id").filter(|v| !v.is_null()).cloned(),
    })
}

/// Normalize a search response. Accepts a bare array or `{"results": [..]}`.
/// Malformed listings are skipped with a warning.
pub fn parse_items(body: &Value, category: &str) -> Result<Vec<Item>, VenueError> {
    let list = match body {
        Value::Array(list) => list,
        Value::Object(obj) => obj
            .get("results")
            .or_else(|| obj.get("items"))
            .and_then(Value::as_array)
            .ok_or_else(|| VenueError::Malformed("response has no results array".to_string()))?,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(VenueError::Malformed(format!(
                "unexpected search response: {}",
                other
            )))
        }
    };

    Ok(list
        .iter()
        .filter_map(|raw| match parse_item(raw, category) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(category, "skipping listing: {}", e);
                None
            }
        })
        .collect())
}

impl Item {
    /// One-line human-readable rendering, optionally numbered.
    ///
    /// `"01. Toy Bear #1234 - 31.5 TON [Wizard | Star | Black]"`
    pub fn display_line(&self, index: Option<usize>) -> String {
        let head = index.map(|i| format!("{:02}. ", i)).unwrap_or_default();
        let parts: Vec<&str> = FLAT_ATTRIBUTES
            .iter()
            .filter_map(|kind| self.attribute(kind))
            .filter(|v| !v.is_empty())
            .collect();
        let tail = if parts.is_empty() {
            String::new()
        } else {
            format!(" [{}]", parts.join(" | "))
        };
        format!(
            "{}{} #{} - {} TON{}",
            head,
            self.name,
            self.number.as_deref().unwrap_or("?"),
            self.price.as_deref().unwrap_or("?"),
            tail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_shape() {
        let raw = json!({
            "id": "abc",
            "tg_id": "1234",
            "name": "Toy Bear",
            "price": "31.5",
            "floor_price": "35",
            "owner_id": 777,
            "attributes": [
                {"type": "model", "value": "Wizard"},
                {"type": "symbol", "value": "Star"},
                {"type": "backdrop", "value": "Black"}
            ]
        });
        let item = parse_item(&raw, "toy bear").unwrap();
        assert_eq!(item.id, "abc");
        assert_eq!(item.number.as_deref(), Some("1234"));
        assert_eq!(item.price.as_deref(), Some("31.5"));
        assert_eq!(item.floor_price.as_deref(), Some("35"));
        assert_eq!(item.backdrop(), Some("Black"));
        assert_eq!(item.owner_ref, Some(json!(777)));
        assert_eq!(item.category, "toy bear");
    }

    #[test]
    fn test_parse_flat_shape() {
        let raw = json!({
            "gift_id": 555,
            "gift_num": 42,
            "name": "Toy Bear",
            "price": 12.25,
            "model": "Wizard",
            "backdrop": "Onyx Black"
        });
        let item = parse_item(&raw, "toy bear").unwrap();
        assert_eq!(item.id, "555");
        assert_eq!(item.number.as_deref(), Some("42"));
        assert_eq!(item.price.as_deref(), Some("12.25"));
        assert_eq!(item.attribute("model"), Some("Wizard"));
        assert_eq!(item.backdrop(), Some("Onyx Black"));
        assert_eq!(item.owner_ref, None);
    }

    #[test]
    fn test_parse_requires_id() {
        let err = parse_item(&json!({"name": "x", "price": 1}), "x").unwrap_err();
        assert!(matches!(err, VenueError::Malformed(_)));
    }

    #[test]
    fn test_parse_items_skips_malformed() {
        let body = json!({"results": [
            {"id": "a", "price": "1"},
            {"price": "2"},
            "garbage",
            {"id": "b", "price": "bad"}
        ]});
        let items = parse_items(&body, "cat").unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        // Non-numeric price is a data error handled later, not a parse failure
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_display_line() {
        let raw = json!({
            "id": "abc", "tg_id": "7", "name": "Toy Bear", "price": "3",
            "attributes": [{"type": "model", "value": "Wizard"}, {"type": "backdrop", "value": "Black"}]
        });
        let item = parse_item(&raw, "toy bear").unwrap();
        assert_eq!(
            item.display_line(Some(1)),
            "01. Toy Bear #7 - 3 TON [Wizard | Black]"
        );
        assert_eq!(item.display_line(None), "Toy Bear #7 - 3 TON [Wizard | Black]");
    }
}
