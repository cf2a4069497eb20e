use crate::filter::normalize;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde_json::Value;
use std::fmt;

/// A category of accounting document queried independently from the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ResourceType {
    SalesReceipt,
    Invoice,
    Payment,
}

impl ResourceType {
    /// The entity name used in queries and as the key under `QueryResponse`.
    pub fn entity_name(&self) -> &'static str {
        match self {
            ResourceType::SalesReceipt => "SalesReceipt",
            ResourceType::Invoice => "Invoice",
            ResourceType::Payment => "Payment",
        }
    }

    /// The tag written to the `transaction_type` column.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::SalesReceipt => "Sales Receipt",
            ResourceType::Invoice => "Invoice",
            ResourceType::Payment => "Payment",
        }
    }

    /// Whether records are exploded into their `Line` entries. Payment lines
    /// link to the invoices being settled, not to products, so a payment is
    /// kept as a single header row.
    pub fn line_level(&self) -> bool {
        !matches!(self, ResourceType::Payment)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_name())
    }
}

/// How the raw item name is read off a line.
///
/// The two policies are not equivalent: a line carrying both a `Description`
/// and an `ItemRef` yields different names, and so different filter results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ItemNamePolicy {
    /// `SalesItemLineDetail.ItemRef.name` only.
    ItemRefOnly,
    /// Non-empty `Description`, falling back to `SalesItemLineDetail.ItemRef.name`.
    DescriptionFirst,
}

/// One row per exploded line item, carrying the header fields of its record.
///
/// Amount-like fields keep the raw JSON value; numeric coercion happens when
/// the final table is assembled.
#[derive(Clone, Debug, PartialEq)]
pub struct LineItemRow {
    pub transaction_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_id: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub item_name: Option<String>,
    pub normalized_item_name: String,
    pub transaction_type: ResourceType,
    pub line_amount: Option<Value>,
    pub total_amount: Option<Value>,
    pub balance: Option<Value>,
    pub quantity: Option<Value>,
    pub unit_price: Option<Value>,
}

/// Flattens header records into one row per `Line` entry.
///
/// A record whose `Line` is missing, empty or not an array still contributes
/// exactly one row, with every line-derived field null. Resource types that are
/// not [line level](ResourceType::line_level) always give one row per record.
pub fn flatten(records: &[Value], resource: ResourceType, policy: ItemNamePolicy) -> Vec<LineItemRow> {
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let transaction_id = scalar_to_string(&record["Id"]);
        let customer_ref = record.get("CustomerRef").filter(|r| r.is_object());
        let customer_name = customer_ref.and_then(|r| scalar_to_string(&r["name"]));
        let customer_id = customer_ref.and_then(|r| scalar_to_string(&r["value"]));
        let transaction_date = parse_transaction_date(&record["TxnDate"]);
        let total_amount = non_null(&record["TotalAmt"]);
        let balance = non_null(&record["Balance"]);

        let header_row = |line: Option<&Value>| {
            let item_name = line.and_then(|l| item_name(l, policy));
            LineItemRow {
                transaction_id: transaction_id.clone(),
                customer_name: customer_name.clone(),
                customer_id: customer_id.clone(),
                transaction_date,
                normalized_item_name: normalize(item_name.as_deref()),
                item_name,
                transaction_type: resource,
                line_amount: line.and_then(line_amount),
                total_amount: total_amount.clone(),
                balance: balance.clone(),
                quantity: line.and_then(|l| line_detail(l, "Qty")),
                unit_price: line.and_then(|l| line_detail(l, "UnitPrice")),
            }
        };

        match record["Line"].as_array() {
            Some(lines) if !lines.is_empty() && resource.line_level() => {
                rows.extend(lines.iter().map(|line| header_row(Some(line))));
            }
            _ => rows.push(header_row(None)),
        }
    }

    rows
}

fn item_name(line: &Value, policy: ItemNamePolicy) -> Option<String> {
    let item_ref = || {
        line.get("SalesItemLineDetail")
            .and_then(|d| d.get("ItemRef"))
            .and_then(|r| scalar_to_string(&r["name"]))
    };

    let name = match policy {
        ItemNamePolicy::ItemRefOnly => item_ref(),
        ItemNamePolicy::DescriptionFirst => scalar_to_string(&line["Description"])
            .filter(|d| !d.trim().is_empty())
            .or_else(item_ref),
    };

    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

// A line that is not a mapping counts as a zero amount.
fn line_amount(line: &Value) -> Option<Value> {
    match line {
        Value::Object(fields) => fields.get("Amount").and_then(non_null),
        _ => Some(Value::from(0)),
    }
}

fn line_detail(line: &Value, key: &str) -> Option<Value> {
    line.get("SalesItemLineDetail")
        .and_then(|d| d.get(key))
        .and_then(non_null)
}

fn non_null(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        v => Some(v.clone()),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses a transaction date, returning `None` for anything unparseable.
///
/// Accepts plain `YYYY-MM-DD` dates as well as RFC 3339 and naive timestamps,
/// keeping only the date part.
pub fn parse_transaction_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}
