use crate::config::Config;
use crate::error::Error;
use crate::transaction::ResourceType;
use log::{debug, info};
use reqwest::{header::ACCEPT, Client, Url};
use serde_json::Value;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AccountingApi: Send + Sync + 'static {
    /// Fetches every record of one resource type, page by page.
    /// # Arguments
    /// * `resource` - The resource type to query.
    /// * `page_size` - The number of records requested per page.
    /// # Returns
    /// A Result containing either all raw records across pages, in server order, or an Error.
    /// A non-2xx response is returned as [`Error::RemoteFetch`] and is not retried.
    async fn fetch(&self, resource: ResourceType, page_size: u32) -> Result<Vec<Value>, Error>;
}

#[derive(Clone)]
pub struct QboClient {
    client: Client,
    base_url: String,
    company_id: String,
    token: String,
}

impl QboClient {
    pub fn new(config: &Config, token: String) -> Self {
        QboClient {
            client: Client::new(),
            base_url: config.api_url.to_string(),
            company_id: config.company_id.to_string(),
            token,
        }
    }

    fn query_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&["v3", "company", self.company_id.as_str(), "query"]);
        Ok(url)
    }

    async fn fetch_page(
        &self,
        resource: ResourceType,
        start_position: u64,
        page_size: u32,
    ) -> Result<Vec<Value>, Error> {
        let query = page_query(resource, start_position, page_size);

        let resp = self
            .client
            .get(self.query_url()?)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .query(&[("query", &query)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::RemoteFetch {
                resource: resource.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: Value = resp.json().await?;
        Ok(body["QueryResponse"][resource.entity_name()]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }
}

fn page_query(resource: ResourceType, start_position: u64, page_size: u32) -> String {
    format!(
        "SELECT * FROM {} STARTPOSITION {} MAXRESULTS {}",
        resource.entity_name(),
        start_position,
        page_size
    )
}

#[async_trait::async_trait]
impl AccountingApi for QboClient {
    async fn fetch(&self, resource: ResourceType, page_size: u32) -> Result<Vec<Value>, Error> {
        if page_size == 0 {
            return Err(Error::InvalidConfig {
                message: "page size must be at least 1".to_string(),
            });
        }

        let mut records = Vec::new();
        let mut start_position = 1u64;

        // A full page always triggers one more request, even if it comes back empty.
        loop {
            let page = self.fetch_page(resource, start_position, page_size).await?;
            let count = page.len();
            records.extend(page);

            debug!(
                "{} startPosition {}: {} records ({} total)",
                resource,
                start_position,
                count,
                records.len()
            );

            if count < page_size as usize {
                break;
            }
            start_position += u64::from(page_size);
        }

        info!("Fetched {} {} records", records.len(), resource);
        Ok(records)
    }
}
