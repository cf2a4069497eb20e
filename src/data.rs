use crate::error::Error;
use crate::transaction::{LineItemRow, ResourceType};
use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use datafusion::arrow::array::{
    ArrayRef, Date32Builder, Float64Builder, RecordBatch, StringBuilder, StringDictionaryBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use datafusion::prelude::{DataFrame, SessionContext};
use serde_json::Value;
use std::sync::Arc;

/// Which source field feeds the `total_amount` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AmountSource {
    /// The line item's `Amount`.
    LineAmount,
    /// The record header's `TotalAmt`.
    HeaderTotal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableLayout {
    pub amount_source: AmountSource,
    pub line_details: bool,
    /// Adds `customer_id` and `balance` after the line-detail columns.
    pub header_details: bool,
}

/// Creates the schema of the final table.
///
/// # Arguments
/// * `layout` - Which of the optional column groups are present
///
/// # Returns
/// An [`Arc<Schema>`] with transaction_id, customer_name, transaction_date, product_name,
/// transaction_type and total_amount, in that order, followed by quantity and sales_price
/// when line details are requested, then customer_id and balance when header details are.
pub fn output_schema(layout: &TableLayout) -> SchemaRef {
    let mut fields = vec![
        Field::new("transaction_id", DataType::Utf8, true),
        Field::new("customer_name", DataType::Utf8, true),
        Field::new("transaction_date", DataType::Date32, true),
        Field::new("product_name", DataType::Utf8, true),
        Field::new(
            "transaction_type",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            true,
        ),
        Field::new("total_amount", DataType::Float64, true),
    ];

    if layout.line_details {
        fields.push(Field::new("quantity", DataType::Float64, true));
        fields.push(Field::new("sales_price", DataType::Float64, true));
    }

    if layout.header_details {
        fields.push(Field::new("customer_id", DataType::Utf8, true));
        fields.push(Field::new("balance", DataType::Float64, true));
    }

    Arc::new(Schema::new(fields))
}

/// Unions the filtered rows of several resource types into the final table.
///
/// # Arguments
/// * `sets` - Filtered rows per resource type, in output order
/// * `layout` - Amount source and optional columns of the final table
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
///
/// # Returns
/// A Result containing either a [`DataFrame`] or an [`Error`]. When every set is
/// empty the DataFrame has zero rows and the full output schema.
pub fn assemble(
    sets: Vec<(ResourceType, Vec<LineItemRow>)>,
    layout: &TableLayout,
    ctx: &SessionContext,
) -> Result<DataFrame, Error> {
    let rows: Vec<LineItemRow> = sets
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .flat_map(|(_, rows)| rows)
        .collect();

    let batch = rows_to_batch(&rows, layout)?;

    Ok(ctx.read_batch(batch)?)
}

fn rows_to_batch(rows: &[LineItemRow], layout: &TableLayout) -> Result<RecordBatch, Error> {
    let num_rows = rows.len();

    let mut id_builder = StringBuilder::with_capacity(num_rows, num_rows * 8);
    let mut customer_builder = StringBuilder::with_capacity(num_rows, num_rows * 16);
    let mut date_builder = Date32Builder::with_capacity(num_rows);
    let mut product_builder = StringBuilder::with_capacity(num_rows, num_rows * 32);
    let mut type_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut amount_builder = Float64Builder::with_capacity(num_rows);
    let mut quantity_builder = Float64Builder::with_capacity(num_rows);
    let mut price_builder = Float64Builder::with_capacity(num_rows);
    let mut customer_id_builder = StringBuilder::with_capacity(num_rows, num_rows * 8);
    let mut balance_builder = Float64Builder::with_capacity(num_rows);

    for row in rows {
        // Header-level records have no line amount to choose.
        let amount = match layout.amount_source {
            AmountSource::LineAmount if row.transaction_type.line_level() => row.line_amount.as_ref(),
            _ => row.total_amount.as_ref(),
        };

        id_builder.append_option(row.transaction_id.as_deref());
        customer_builder.append_option(row.customer_name.as_deref());
        date_builder.append_option(row.transaction_date.map(days_since_epoch));
        product_builder.append_option(row.item_name.as_deref());
        type_builder.append(row.transaction_type.label())?;
        amount_builder.append_option(amount.and_then(coerce_numeric));
        quantity_builder.append_option(row.quantity.as_ref().and_then(coerce_numeric));
        price_builder.append_option(row.unit_price.as_ref().and_then(coerce_numeric));
        customer_id_builder.append_option(row.customer_id.as_deref());
        balance_builder.append_option(row.balance.as_ref().and_then(coerce_numeric));
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(id_builder.finish()),
        Arc::new(customer_builder.finish()),
        Arc::new(date_builder.finish()),
        Arc::new(product_builder.finish()),
        Arc::new(type_builder.finish()),
        Arc::new(amount_builder.finish()),
    ];

    if layout.line_details {
        columns.push(Arc::new(quantity_builder.finish()));
        columns.push(Arc::new(price_builder.finish()));
    }

    if layout.header_details {
        columns.push(Arc::new(customer_id_builder.finish()));
        columns.push(Arc::new(balance_builder.finish()));
    }

    Ok(RecordBatch::try_new(output_schema(layout), columns)?)
}

/// Coerces a raw JSON value to a number; anything that does not parse, or is
/// not finite, becomes `None`.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number.filter(|n| n.is_finite())
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - DateTime::<Utc>::UNIX_EPOCH.date_naive()).num_days() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{flatten, ItemNamePolicy};
    use datafusion::arrow::array::{Array, Date32Array, Float64Array, StringArray};
    use datafusion::arrow::compute::{cast_with_options, CastOptions};
    use serde_json::json;

    const LINE_LAYOUT: TableLayout = TableLayout {
        amount_source: AmountSource::LineAmount,
        line_details: false,
        header_details: false,
    };

    const DETAIL_LAYOUT: TableLayout = TableLayout {
        amount_source: AmountSource::HeaderTotal,
        line_details: true,
        header_details: false,
    };

    const PAYMENT_LAYOUT: TableLayout = TableLayout {
        amount_source: AmountSource::LineAmount,
        line_details: false,
        header_details: true,
    };

    fn receipt_rows() -> Vec<LineItemRow> {
        flatten(
            &[json!({
                "Id": "r1",
                "CustomerRef": {"name": "Acme"},
                "TxnDate": "2023-10-01",
                "TotalAmt": 500,
                "Line": [{
                    "Amount": "120.50",
                    "SalesItemLineDetail": {"ItemRef": {"name": "Widget"}, "Qty": "2", "UnitPrice": "n/a"}
                }]
            })],
            ResourceType::SalesReceipt,
            ItemNamePolicy::ItemRefOnly,
        )
    }

    fn invoice_rows() -> Vec<LineItemRow> {
        flatten(
            &[json!({
                "Id": "i1",
                "TxnDate": "not a date",
                "TotalAmt": 75,
                "Line": [{"Amount": 75, "SalesItemLineDetail": {"ItemRef": {"name": "Widget"}}}]
            })],
            ResourceType::Invoice,
            ItemNamePolicy::ItemRefOnly,
        )
    }

    fn column_names(schema: &Schema) -> Vec<String> {
        schema.fields().iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn test_output_schema_order() {
        let schema = output_schema(&LINE_LAYOUT);
        assert_eq!(
            column_names(&schema),
            vec![
                "transaction_id",
                "customer_name",
                "transaction_date",
                "product_name",
                "transaction_type",
                "total_amount"
            ]
        );

        let schema = output_schema(&DETAIL_LAYOUT);
        assert_eq!(schema.fields().len(), 8);
        assert_eq!(schema.field(6).name(), "quantity");
        assert_eq!(schema.field(7).name(), "sales_price");
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(coerce_numeric(&json!(12)), Some(12.0));
        assert_eq!(coerce_numeric(&json!(" 7.25 ")), Some(7.25));
        assert_eq!(coerce_numeric(&json!("n/a")), None);
        assert_eq!(coerce_numeric(&json!("NaN")), None);
        assert_eq!(coerce_numeric(&json!(true)), None);
        assert_eq!(coerce_numeric(&json!({"value": 1})), None);
    }

    #[test]
    fn test_days_since_epoch() {
        let date = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        assert_eq!(days_since_epoch(date), 19631);
    }

    #[tokio::test]
    async fn test_assemble_all_empty_keeps_schema() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = assemble(
            vec![
                (ResourceType::SalesReceipt, vec![]),
                (ResourceType::Invoice, vec![]),
            ],
            &DETAIL_LAYOUT,
            &ctx,
        )?;

        assert_eq!(
            column_names(df.schema().as_arrow()),
            column_names(&output_schema(&DETAIL_LAYOUT))
        );
        let batches = df.collect().await?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_assemble_orders_sets_and_coerces() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = assemble(
            vec![
                (ResourceType::SalesReceipt, receipt_rows()),
                (ResourceType::Invoice, invoice_rows()),
            ],
            &LINE_LAYOUT,
            &ctx,
        )?;

        let result = df.collect().await?;
        assert_eq!(result.len(), 1);
        let batch = &result[0];
        assert_eq!(batch.num_rows(), 2);

        let ids = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ids.value(0), "r1");
        assert_eq!(ids.value(1), "i1");

        let dates = batch.column(2).as_any().downcast_ref::<Date32Array>().unwrap();
        assert_eq!(dates.value(0), 19631);
        assert!(dates.is_null(1));

        let types = cast_with_options(batch.column(4).as_ref(), &DataType::Utf8, &CastOptions::default())?;
        let types = types.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(types.value(0), "Sales Receipt");
        assert_eq!(types.value(1), "Invoice");

        let amounts = batch.column(5).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(amounts.value(0), 120.5);
        assert_eq!(amounts.value(1), 75.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_assemble_header_total_with_line_details() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = assemble(
            vec![
                (ResourceType::SalesReceipt, receipt_rows()),
                (ResourceType::Invoice, vec![]),
            ],
            &DETAIL_LAYOUT,
            &ctx,
        )?;

        let result = df.collect().await?;
        let batch = &result[0];
        assert_eq!(batch.num_rows(), 1);

        let amounts = batch.column(5).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(amounts.value(0), 500.0);
        let quantity = batch.column(6).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(quantity.value(0), 2.0);
        let price = batch.column(7).as_any().downcast_ref::<Float64Array>().unwrap();
        assert!(price.is_null(0));

        Ok(())
    }

    #[tokio::test]
    async fn test_assemble_payments_with_header_details() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let payments = flatten(
            &[json!({
                "Id": "p1",
                "CustomerRef": {"value": "55", "name": "Acme"},
                "TxnDate": "2024-03-01",
                "TotalAmt": "250.00",
                "Balance": 0,
                "Line": [{"Amount": 100}, {"Amount": 150}]
            })],
            ResourceType::Payment,
            ItemNamePolicy::ItemRefOnly,
        );
        let df = assemble(vec![(ResourceType::Payment, payments)], &PAYMENT_LAYOUT, &ctx)?;

        let names = column_names(df.schema().as_arrow());
        assert_eq!(names.len(), 8);
        assert_eq!(names[6], "customer_id");
        assert_eq!(names[7], "balance");

        let result = df.collect().await?;
        let batch = &result[0];
        assert_eq!(batch.num_rows(), 1);

        let amounts = batch.column(5).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(amounts.value(0), 250.0);
        let customer_ids = batch.column(6).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(customer_ids.value(0), "55");
        let balances = batch.column(7).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(balances.value(0), 0.0);

        Ok(())
    }
}
