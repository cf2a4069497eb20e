use crate::data::{AmountSource, TableLayout};
use crate::error::Error;
use crate::filter::ProductFilter;
use crate::transaction::{ItemNamePolicy, ResourceType};
use crate::warehouse::{Destination, WriteMode};
use clap::Args as ClapArgs;

const DEFAULT_API_URL: &str = "https://quickbooks.api.intuit.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const SECRETS_FILE: &str = "./secrets.json";
const REFRESH_TOKEN_SECRET: &str = "qbo-refresh-token";
const WAREHOUSE_DIR: &str = "./warehouse";
const DATASET: &str = "quickbooks_data";
const TABLE: &str = "wahs_qbo_sales";
const TARGET_PRODUCT: &str = "Products:We Are, HIPAA Smart";
const PAGE_SIZE: &str = "1000";

#[derive(ClapArgs, Clone, Debug)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "QBO_API_URL")]
    pub(crate) api_url: String,

    #[arg(long, default_value = DEFAULT_TOKEN_URL, env = "QBO_TOKEN_URL")]
    pub(crate) token_url: String,

    #[arg(long, env = "QB_COMPANY_ID")]
    pub(crate) company_id: String,

    #[arg(long, env = "QB_CLIENT_ID")]
    pub(crate) client_id: Option<String>,

    #[arg(long, env = "QB_CLIENT_SECRET", hide_env_values = true)]
    pub(crate) client_secret: Option<String>,

    /// Use this bearer token as-is instead of refreshing one
    #[arg(long, env = "QBO_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) access_token: Option<String>,

    #[arg(long, default_value = SECRETS_FILE, env = "SECRETS_FILE")]
    pub(crate) secrets_file: String,

    #[arg(long, default_value = REFRESH_TOKEN_SECRET, env = "QB_SECRET_NAME")]
    pub(crate) secret_name: String,

    #[arg(long, default_value = WAREHOUSE_DIR, env = "WAREHOUSE_DIR")]
    pub(crate) warehouse_dir: String,

    /// Full `project.dataset.table` name; overrides the three parts below
    #[arg(long, env = "BQ_TABLE_REF")]
    pub(crate) destination: Option<String>,

    #[arg(long, env = "BQ_PROJECT_ID")]
    pub(crate) project: Option<String>,

    #[arg(long, default_value = DATASET, env = "BQ_DATASET")]
    pub(crate) dataset: String,

    #[arg(long, default_value = TABLE, env = "BQ_TABLE")]
    pub(crate) table: String,

    #[arg(long, default_value = TARGET_PRODUCT, env = "TARGET_PRODUCT")]
    pub(crate) target_product: String,

    /// Keep every line item instead of filtering on the target product
    #[arg(long, env = "NO_FILTER")]
    pub(crate) no_filter: bool,

    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values = ["sales-receipt", "invoice"],
        env = "QBO_RESOURCES"
    )]
    pub(crate) resources: Vec<ResourceType>,

    #[arg(long, value_enum, default_value = "item-ref-only", env = "ITEM_NAME_POLICY")]
    pub(crate) item_name_policy: ItemNamePolicy,

    #[arg(long, value_enum, default_value = "line-amount", env = "AMOUNT_SOURCE")]
    pub(crate) amount_source: AmountSource,

    /// Add quantity and sales_price columns to the output table
    #[arg(long, env = "LINE_DETAILS")]
    pub(crate) line_details: bool,

    /// Add customer_id and balance columns to the output table
    #[arg(long, env = "HEADER_DETAILS")]
    pub(crate) header_details: bool,

    #[arg(long, value_enum, default_value = "replace", env = "WRITE_MODE")]
    pub(crate) write_mode: WriteMode,

    #[arg(long, default_value = PAGE_SIZE, env = "QBO_PAGE_SIZE")]
    pub(crate) page_size: u32,
}

/// The transform-side settings derived from [`Config`], built once per run.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub resources: Vec<ResourceType>,
    pub page_size: u32,
    pub item_name_policy: ItemNamePolicy,
    pub filter: Option<ProductFilter>,
    pub layout: TableLayout,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.page_size == 0 {
            return Err(invalid("page size must be at least 1"));
        }
        if self.resources.is_empty() {
            return Err(invalid("at least one resource type is required"));
        }
        if self.company_id.trim().is_empty() {
            return Err(invalid("company id is empty"));
        }
        if !self.no_filter && self.resources.contains(&ResourceType::Payment) {
            return Err(invalid(
                "payments carry no product lines and never match the product filter; use --no-filter",
            ));
        }
        self.destination().map(|_| ())
    }

    pub fn destination(&self) -> Result<Destination, Error> {
        match &self.destination {
            Some(table_ref) => table_ref.parse(),
            None => Destination::new(
                self.project.as_deref().unwrap_or_default(),
                &self.dataset,
                &self.table,
            ),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            resources: self.resources.clone(),
            page_size: self.page_size,
            item_name_policy: self.item_name_policy,
            filter: (!self.no_filter).then(|| ProductFilter::new(&self.target_product)),
            layout: TableLayout {
                amount_source: self.amount_source,
                line_details: self.line_details,
                header_details: self.header_details,
            },
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_config(warehouse_dir: &str) -> Config {
    Config {
        api_url: String::from("http://localhost"),
        token_url: String::from("http://localhost/token"),
        company_id: String::from("realm_123"),
        client_id: None,
        client_secret: None,
        access_token: Some(String::from("test_token")),
        secrets_file: String::from("./secrets.json"),
        secret_name: String::from(REFRESH_TOKEN_SECRET),
        warehouse_dir: warehouse_dir.to_string(),
        destination: None,
        project: Some(String::from("acme-analytics")),
        dataset: String::from(DATASET),
        table: String::from(TABLE),
        target_product: String::from(TARGET_PRODUCT),
        no_filter: false,
        resources: vec![ResourceType::SalesReceipt, ResourceType::Invoice],
        item_name_policy: ItemNamePolicy::ItemRefOnly,
        amount_source: AmountSource::LineAmount,
        line_details: false,
        header_details: false,
        write_mode: WriteMode::Replace,
        page_size: 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = test_config("./warehouse");
        config.page_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_destination_part() {
        let mut config = test_config("./warehouse");
        config.dataset = String::from(" ");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_requires_project() {
        let mut config = test_config("./warehouse");
        config.project = None;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_filtered_payments() {
        let mut config = test_config("./warehouse");
        config.resources = vec![ResourceType::Payment];
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        config.no_filter = true;
        config.header_details = true;
        assert!(config.validate().is_ok());
        assert!(config.pipeline_settings().layout.header_details);
    }

    #[test]
    fn test_destination_override() {
        let mut config = test_config("./warehouse");
        assert_eq!(
            config.destination().unwrap().to_string(),
            "acme-analytics.quickbooks_data.wahs_qbo_sales"
        );

        config.destination = Some(String::from("other.finance.invoices_filtered"));
        assert_eq!(config.destination().unwrap().table, "invoices_filtered");
    }

    #[test]
    fn test_pipeline_settings_filter() {
        let mut config = test_config("./warehouse");
        let settings = config.pipeline_settings();
        assert_eq!(
            settings.filter.map(|f| f.target().to_string()).as_deref(),
            Some("products:we are, hipaa smart")
        );

        config.no_filter = true;
        assert!(config.pipeline_settings().filter.is_none());
    }
}
