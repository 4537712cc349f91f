//! Cross-venue cheapest-first ranking.

use rust_decimal::Decimal;

use crate::types::{Item, VenueId};

/// One ranked listing tagged with its venue of origin.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub venue: VenueId,
    pub price: Decimal,
    pub item: Item,
}

impl RankedItem {
    /// `"[PORTALS] 01. Toy Bear #7 - 3 TON [...]"`
    pub fn display_line(&self, index: usize) -> String {
        format!(
            "{:<9} {}",
            format!("[{}]", self.venue),
            self.item.display_line(Some(index))
        )
    }
}

/// Merge per-venue result lists into one ascending-price ranking of at most
/// `limit` entries.
///
/// Input order matters for ties: the sort is stable, so equal prices keep
/// venue order first and then each venue's own order. Items whose price is
/// missing or non-numeric are dropped, not ranked.
pub fn merge_cheapest(per_venue: &[(VenueId, Vec<Item>)], limit: usize) -> Vec<RankedItem> {
    let mut combined: Vec<RankedItem> = per_venue
        .iter()
        .flat_map(|(venue, items)| {
            items.iter().filter_map(move |item| {
                item.price_value().map(|price| RankedItem {
                    venue: venue.clone(),
                    price,
                    item: item.clone(),
                })
            })
        })
        .collect();

    combined.sort_by(|a, b| a.price.cmp(&b.price));
    combined.truncate(limit);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, price: &str) -> Item {
        Item {
            id: id.into(),
            name: "Toy Bear".into(),
            number: Some(id.into()),
            price: Some(price.into()),
            floor_price: None,
            category: "toy bear".into(),
            attributes: vec![],
            owner_ref: None,
        }
    }

    fn priced(ids_prices: &[(&str, &str)]) -> Vec<Item> {
        ids_prices.iter().map(|(id, p)| item(id, p)).collect()
    }

    fn summary(ranked: &[RankedItem]) -> Vec<(String, String)> {
        ranked
            .iter()
            .map(|r| (r.venue.to_string(), r.item.id.clone()))
            .collect()
    }

    #[test]
    fn test_interleaves_by_price() {
        let a = VenueId::new("A");
        let b = VenueId::new("B");
        let input = vec![
            (a, priced(&[("a1", "1"), ("a3", "3"), ("a5", "5")])),
            (b, priced(&[("b2", "2"), ("b4", "4")])),
        ];
        let ranked = merge_cheapest(&input, 4);
        assert_eq!(
            summary(&ranked),
            vec![
                ("A".to_string(), "a1".to_string()),
                ("B".to_string(), "b2".to_string()),
                ("A".to_string(), "a3".to_string()),
                ("B".to_string(), "b4".to_string()),
            ]
        );
        let prices: Vec<Decimal> = ranked.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![1, 2, 3, 4].into_iter().map(Decimal::from).collect::<Vec<_>>());
    }

    #[test]
    fn test_ties_keep_input_order() {
        let input = vec![
            (VenueId::new("A"), priced(&[("a1", "2"), ("a2", "2.0")])),
            (VenueId::new("B"), priced(&[("b1", "2")])),
        ];
        let ranked = merge_cheapest(&input, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_non_numeric_prices_excluded() {
        let mut missing = item("y", "0");
        missing.price = None;
        let input = vec![(
            VenueId::new("A"),
            vec![item("ok", "5"), item("x", "n/a"), missing],
        )];
        let ranked = merge_cheapest(&input, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.id, "ok");
    }

    #[test]
    fn test_limit_and_empty() {
        assert!(merge_cheapest(&[], 5).is_empty());
        let input = vec![(VenueId::new("A"), priced(&[("a", "1"), ("b", "2")]))];
        assert_eq!(merge_cheapest(&input, 1).len(), 1);
        assert!(merge_cheapest(&input, 0).is_empty());
    }

    #[test]
    fn test_display_line_tags_venue() {
        let input = vec![(VenueId::new("tonnel"), priced(&[("a", "1")]))];
        let ranked = merge_cheapest(&input, 1);
        assert_eq!(ranked[0].display_line(1), "[TONNEL]  01. Toy Bear #a - 1 TON");
    }
}
