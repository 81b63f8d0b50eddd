use std::env;
use std::sync::Arc;

use crate::error::ServerError;
use crate::gcs::{self, GcsBucket};
use crate::sqlite::LocalBucket;
use crate::SharedStorage;

const CURRENT_DIR: &str = "./";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Directory plus SQLite index on this machine.
    Local { data_dir: String },
    /// GCS compatible JSON API.
    Gcs {
        endpoint: String,
        token: Option<String>,
    },
}

/// Server settings, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bucket: Option<String>,
    pub backend: Backend,
}

impl ServerConfig {
    /// Reads `FILEDECK_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("FILEDECK_PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| ServerError::Config(format!("FILEDECK_PORT is not a port: {p}")))?,
            None => DEFAULT_PORT,
        };
        let bucket = lookup("FILEDECK_BUCKET").filter(|b| !b.trim().is_empty());

        let backend = match lookup("FILEDECK_BACKEND").as_deref().unwrap_or("local") {
            "local" => Backend::Local {
                data_dir: lookup("FILEDECK_DATA_DIR").unwrap_or_else(|| String::from(CURRENT_DIR)),
            },
            "gcs" => Backend::Gcs {
                endpoint: lookup("FILEDECK_GCS_ENDPOINT")
                    .unwrap_or_else(|| String::from(gcs::DEFAULT_ENDPOINT)),
                token: lookup("FILEDECK_GCS_TOKEN").filter(|t| !t.is_empty()),
            },
            other => {
                return Err(ServerError::Config(format!(
                    "unknown FILEDECK_BACKEND '{other}', expected 'local' or 'gcs'"
                )))
            }
        };

        Ok(Self {
            port,
            bucket,
            backend,
        })
    }

    /// Builds the storage backend this configuration describes.
    pub fn open_storage(&self) -> Result<SharedStorage, ServerError> {
        let bucket = self.bucket.as_deref();
        let storage: SharedStorage = match &self.backend {
            Backend::Local { data_dir } => Arc::new(LocalBucket::open(data_dir, bucket)?),
            Backend::Gcs { endpoint, token } => {
                Arc::new(GcsBucket::new(endpoint, bucket, token.as_deref())?)
            }
        };
        Ok(storage)
    }
}
