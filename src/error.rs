use datafusion::parquet::errors::ParquetError;
use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential error: {message}")]
    Credential { message: String },

    #[error("{resource} fetch failed with status {status}: {body}")]
    RemoteFetch {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("Loading into {destination} failed: {source}")]
    Load {
        destination: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Column '{column}' is {existing} in the table but {incoming} in the new rows")]
    SchemaConflict {
        column: String,
        existing: String,
        incoming: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    pub fn credential(message: impl Into<String>) -> Self {
        Error::Credential {
            message: message.into(),
        }
    }

    pub fn load(destination: impl ToString, source: Error) -> Self {
        Error::Load {
            destination: destination.to_string(),
            source: Box::new(source),
        }
    }
}
