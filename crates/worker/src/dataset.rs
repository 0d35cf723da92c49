//! Dataset sources: where uploaded coordinate files are read from.
//!
//! Objects are streamed, never staged on local disk.

use async_trait::async_trait;
use futures::TryStreamExt;
use pipeline_core::{DatasetRef, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Byte stream of one dataset object.
pub type DatasetReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Open a dataset for streaming.
    async fn open(&self, dataset: &DatasetRef) -> Result<DatasetReader>;
}

/// Reads `<root>/<bucket>/<key>` from the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDatasetSource {
    root: PathBuf,
}

impl FsDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, dataset: &DatasetRef) -> Result<PathBuf> {
        let relative = Path::new(&dataset.bucket).join(&dataset.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::dataset(format!(
                "object path escapes dataset root: {}",
                dataset
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DatasetSource for FsDatasetSource {
    async fn open(&self, dataset: &DatasetRef) -> Result<DatasetReader> {
        let path = self.path_for(dataset)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::dataset(format!("cannot open {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Opened dataset file");
        Ok(Box::new(file))
    }
}

/// Streams `GET <endpoint>/<bucket>/<key>` from an object store endpoint.
#[derive(Clone)]
pub struct HttpDatasetSource {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpDatasetSource {
    /// `read_timeout` bounds each wait for response bytes.
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Object URL with every path segment percent-encoded.
    pub fn url_for(&self, dataset: &DatasetRef) -> String {
        let key = dataset
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.endpoint,
            urlencoding::encode(&dataset.bucket),
            key
        )
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn open(&self, dataset: &DatasetRef) -> Result<DatasetReader> {
        let url = self.url_for(dataset);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::dataset(format!("download of {} failed: {}", dataset, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::dataset(format!(
                "download of {} failed: HTTP {}",
                dataset, status
            )));
        }

        debug!(url = %url, content_length = ?response.content_length(), "Streaming dataset");

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}

/// Which dataset source to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetBackend {
    #[default]
    Fs,
    Http,
}

/// Dataset source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub backend: DatasetBackend,
    /// Root directory for the `fs` backend
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Object endpoint for the `http` backend
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the next chunk of an object
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    30
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            backend: DatasetBackend::default(),
            root: default_root(),
            endpoint: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl DatasetConfig {
    pub fn build(&self) -> Result<Arc<dyn DatasetSource>> {
        match self.backend {
            DatasetBackend::Fs => Ok(Arc::new(FsDatasetSource::new(self.root.clone()))),
            DatasetBackend::Http => {
                let endpoint = self.endpoint.as_deref().ok_or_else(|| {
                    Error::config("dataset.endpoint is required for the http backend")
                })?;
                Ok(Arc::new(HttpDatasetSource::new(
                    endpoint,
                    Duration::from_secs(self.connect_timeout_secs),
                    Duration::from_secs(self.read_timeout_secs),
                )?))
            }
        }
    }
}
