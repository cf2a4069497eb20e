use crate::api_client::{AccountingApi, QboClient};
use crate::auth::{OAuthRefresher, StaticToken, TokenProvider};
use crate::config::{Config, PipelineSettings};
use crate::data;
use crate::error::Error;
use crate::filter::ProductFilter;
use crate::secrets::FileSecretStore;
use crate::transaction;
use crate::warehouse::{Destination, ParquetWarehouse, WarehouseLoader, WriteMode};
use datafusion::prelude::{DataFrame, SessionContext};
use log::{info, warn};

#[derive(Debug)]
pub struct RunReport {
    pub destination: Destination,
    pub mode: WriteMode,
    pub rows_loaded: u64,
}

impl RunReport {
    pub fn message(&self) -> String {
        format!(
            "QuickBooks data loaded successfully! Loaded {} rows into {} ({:?}).",
            self.rows_loaded, self.destination, self.mode
        )
    }
}

/// Runs the whole pipeline: authenticate, extract, transform and load.
pub async fn run_pipeline(config: Config) -> Result<RunReport, Error> {
    config.validate()?;
    let destination = config.destination()?;

    let api = connect(token_provider(&config)?.as_ref(), &config).await?;
    let warehouse = ParquetWarehouse::new(&config);

    sync(
        &api,
        &warehouse,
        &config.pipeline_settings(),
        &destination,
        config.write_mode,
    )
    .await
}

/// Runs extraction and transformation only, printing the resulting table.
pub async fn preview(config: Config) -> Result<(), Error> {
    config.validate()?;

    let api = connect(token_provider(&config)?.as_ref(), &config).await?;
    let ctx = SessionContext::new();
    let df = extract_and_transform(&api, &config.pipeline_settings(), &ctx).await?;
    df.show().await?;

    Ok(())
}

/// Prints the current contents of the destination table.
pub async fn show_table(config: Config) -> Result<(), Error> {
    let ctx = SessionContext::new();
    let df = table_contents(&config, &ctx).await?;
    df.show().await?;

    Ok(())
}

async fn table_contents(config: &Config, ctx: &SessionContext) -> Result<DataFrame, Error> {
    config.validate()?;
    let destination = config.destination()?;

    ParquetWarehouse::new(config).read_table(ctx, &destination).await
}

fn token_provider(config: &Config) -> Result<Box<dyn TokenProvider>, Error> {
    match &config.access_token {
        Some(token) => Ok(Box::new(StaticToken::new(token.clone()))),
        None => {
            let store = FileSecretStore::new(config);
            Ok(Box::new(OAuthRefresher::new(config, store)?))
        }
    }
}

async fn connect(tokens: &dyn TokenProvider, config: &Config) -> Result<QboClient, Error> {
    let token = tokens.access_token().await?;
    info!("Authenticated against the accounting API");
    Ok(QboClient::new(config, token))
}

/// Extracts, transforms and loads with the given collaborators.
pub async fn sync<A, W>(
    api: &A,
    warehouse: &W,
    settings: &PipelineSettings,
    destination: &Destination,
    mode: WriteMode,
) -> Result<RunReport, Error>
where
    A: AccountingApi + ?Sized,
    W: WarehouseLoader + ?Sized,
{
    let ctx = SessionContext::new();
    let df = extract_and_transform(api, settings, &ctx).await?;
    let rows_loaded = warehouse.load(df, destination, mode).await?;

    Ok(RunReport {
        destination: destination.clone(),
        mode,
        rows_loaded,
    })
}

/// Fetches every configured resource type, then flattens, filters and
/// assembles them into the final table.
///
/// All fetches complete before any transformation starts, so a failure for one
/// resource type aborts the run with nothing loaded.
pub async fn extract_and_transform<A>(
    api: &A,
    settings: &PipelineSettings,
    ctx: &SessionContext,
) -> Result<DataFrame, Error>
where
    A: AccountingApi + ?Sized,
{
    let mut fetched = Vec::with_capacity(settings.resources.len());
    for resource in &settings.resources {
        let records = api.fetch(*resource, settings.page_size).await?;
        fetched.push((*resource, records));
    }

    let mut sets = Vec::with_capacity(fetched.len());
    let mut matched = 0;
    for (resource, records) in fetched {
        let rows = transaction::flatten(&records, resource, settings.item_name_policy);
        let rows = match &settings.filter {
            Some(filter) => filter.apply(rows),
            None => rows,
        };
        info!("{}: {} matching line items", resource, rows.len());
        matched += rows.len();
        sets.push((resource, rows));
    }

    if matched == 0 {
        warn!(
            "No transactions found matching '{}'; the table will have zero rows",
            settings.filter.as_ref().map_or("", ProductFilter::target)
        );
    }

    data::assemble(sets, &settings.layout, ctx)
}
