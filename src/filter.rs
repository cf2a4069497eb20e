use crate::transaction::LineItemRow;

/// Collapses whitespace runs to a single space, lowercases and trims.
///
/// A missing value normalizes to the empty string.
pub fn normalize(text: Option<&str>) -> String {
    text.unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keeps the rows whose normalized item name equals a normalized target.
#[derive(Clone, Debug)]
pub struct ProductFilter {
    target: String,
}

impl ProductFilter {
    pub fn new(target: &str) -> Self {
        ProductFilter {
            target: normalize(Some(target)),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Exact equality after normalization. Rows without an item name never match.
    pub fn matches(&self, row: &LineItemRow) -> bool {
        row.item_name.is_some() && row.normalized_item_name == self.target
    }

    pub fn apply(&self, rows: Vec<LineItemRow>) -> Vec<LineItemRow> {
        rows.into_iter().filter(|row| self.matches(row)).collect()
    }
}
