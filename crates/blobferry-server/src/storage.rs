//! Azure Blob Storage client lifecycle and the upload boundary
//!
//! Credentials are resolved once at startup and proven by a metadata call
//! against the target container before the pipeline accepts work. Order:
//! Entra ID (`DefaultAzureCredential`), then connection string, then account
//! key. A missing container is created; anything else aborts startup.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use blobferry_common::FerryError;
use azure_core::StatusCode;
use azure_storage::{CloudLocation, ConnectionString, StorageCredentials};
use azure_storage_blobs::blob::{BlobBlockType, BlockList};
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::AzureConfig;

/// Files at or below this size go up in one `Put Blob` call.
const SINGLE_PUT_LIMIT: u64 = 32 * 1024 * 1024;

/// Block size for staged block-list uploads.
const BLOCK_SIZE: usize = 8 * 1024 * 1024;

const OCTET_STREAM: &str = "application/octet-stream";

/// Upload boundary consumed by the worker pipeline.
///
/// The contract: the call commits a blob whose contents are exactly the
/// bytes of `source`, overwriting any previous blob under that name, with
/// partial uploads never visible. Any error is an item-level failure.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `source` as a block blob named `blob_name`.
    /// Returns the number of bytes uploaded.
    async fn upload_file(
        &self,
        blob_name: &str,
        source: &Path,
        max_concurrency: usize,
    ) -> Result<u64>;
}

/// Azure Blob Storage implementation of [`BlobStore`]
pub struct Storage {
    container: ContainerClient,
    container_name: String,
}

enum Validation {
    /// Credential was rejected; the next credential source may be tried.
    AuthRejected(azure_core::error::Error),
    /// Unrecoverable startup failure (container cannot be created, network).
    Fatal(anyhow::Error),
}

impl Storage {
    /// Create and validate the Azure client. Fails fast when no configured
    /// credential source can reach (or create) the target container.
    pub async fn new(config: &AzureConfig) -> Result<Self> {
        let account = account_from_url(&config.account_url)?;

        match azure_identity::create_credential() {
            Ok(credential) => {
                let credentials = StorageCredentials::token_credential(credential);
                let container = Self::container_client(config, &account, credentials);
                match Self::validate(&container, &config.container).await {
                    Ok(()) => {
                        info!(container = %config.container, "Azure container validated");
                        return Ok(Self {
                            container,
                            container_name: config.container.clone(),
                        });
                    }
                    Err(Validation::AuthRejected(err)) => {
                        warn!("Default Azure credential rejected ({err}), attempting fallback auth");
                    }
                    Err(Validation::Fatal(err)) => return Err(err),
                }
            }
            Err(err) => {
                warn!("Default Azure credential unavailable ({err}), attempting fallback auth");
            }
        }

        let (fallback_account, credentials) = fallback_credentials(config, &account)?;
        let container = Self::container_client(config, &fallback_account, credentials);
        match Self::validate(&container, &config.container).await {
            Ok(()) => {
                info!(
                    container = %config.container,
                    "Azure container validated with fallback credentials"
                );
                Ok(Self {
                    container,
                    container_name: config.container.clone(),
                })
            }
            Err(Validation::AuthRejected(err)) => {
                Err(anyhow!("Fallback Azure credentials rejected: {err}"))
            }
            Err(Validation::Fatal(err)) => Err(err),
        }
    }

    fn container_client(
        config: &AzureConfig,
        account: &str,
        credentials: StorageCredentials,
    ) -> ContainerClient {
        let builder = if is_public_endpoint(&config.account_url) {
            ClientBuilder::new(account, credentials)
        } else {
            // Custom endpoints (sovereign clouds, Azurite) keep the full URI.
            ClientBuilder::with_location(
                CloudLocation::Custom {
                    account: account.to_string(),
                    uri: config.account_url.trim_end_matches('/').to_string(),
                },
                credentials,
            )
        };
        builder.container_client(&config.container)
    }

    /// One metadata round trip proving the credential and the container.
    async fn validate(container: &ContainerClient, name: &str) -> Result<(), Validation> {
        match container.get_properties().await {
            Ok(_) => Ok(()),
            Err(err) => match err.as_http_error().map(|http| http.status()) {
                Some(StatusCode::NotFound) => {
                    container.create().await.map_err(|create_err| {
                        Validation::Fatal(anyhow!(
                            "Cannot create container '{name}': {create_err}"
                        ))
                    })?;
                    info!(container = %name, "Created Azure container");
                    Ok(())
                }
                Some(StatusCode::Unauthorized) | Some(StatusCode::Forbidden) => {
                    Err(Validation::AuthRejected(err))
                }
                _ => Err(Validation::Fatal(
                    anyhow::Error::new(err).context(format!("Azure container '{name}' validation failed")),
                )),
            },
        }
    }

    async fn upload_single(&self, blob: &BlobClient, source: &Path, size: u64) -> Result<()> {
        let data = tokio::fs::read(source).await.context("read staging file")?;
        debug_assert_eq!(data.len() as u64, size);
        blob.put_block_blob(data)
            .content_type(OCTET_STREAM)
            .await
            .context("put blob")?;
        Ok(())
    }

    /// Staged upload: sequential reads, up to `max_concurrency` blocks in
    /// flight, then one block-list commit. Memory stays bounded by
    /// `max_concurrency * BLOCK_SIZE`.
    async fn upload_blocks(
        &self,
        blob: &BlobClient,
        source: &Path,
        max_concurrency: usize,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(source)
            .await
            .context("open staging file")?;
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks: JoinSet<azure_core::Result<()>> = JoinSet::new();
        let mut block_ids: Vec<String> = Vec::new();

        loop {
            let mut buf = vec![0u8; BLOCK_SIZE];
            let filled = read_full(&mut file, &mut buf).await.context("read block")?;
            if filled == 0 {
                break;
            }
            buf.truncate(filled);

            let block_id = format!("{:08}", block_ids.len());
            block_ids.push(block_id.clone());

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("acquire upload slot")?;
            let blob = blob.clone();
            tasks.spawn(async move {
                let _permit = permit;
                blob.put_block(block_id, Bytes::from(buf)).await?;
                Ok(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.context("block upload task panicked")??;
        }

        let block_list = BlockList {
            blocks: block_ids
                .into_iter()
                .map(BlobBlockType::new_uncommitted)
                .collect(),
        };
        blob.put_block_list(block_list)
            .content_type(OCTET_STREAM)
            .await
            .context("commit block list")?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for Storage {
    async fn upload_file(
        &self,
        blob_name: &str,
        source: &Path,
        max_concurrency: usize,
    ) -> Result<u64> {
        let size = tokio::fs::metadata(source)
            .await
            .context("stat staging file")?
            .len();
        let blob = self.container.blob_client(blob_name);

        debug!(
            blob_name,
            container = %self.container_name,
            size_bytes = size,
            "Uploading blob"
        );

        if size <= SINGLE_PUT_LIMIT {
            self.upload_single(&blob, source, size).await?;
        } else {
            self.upload_blocks(&blob, source, max_concurrency).await?;
        }

        Ok(size)
    }
}

async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Fallback credential chain: connection string, then shared key.
fn fallback_credentials(
    config: &AzureConfig,
    parsed_account: &str,
) -> Result<(String, StorageCredentials)> {
    if let Some(ref raw) = config.connection_string {
        let connection_string =
            ConnectionString::new(raw).context("parse APP_AZURE_CONNECTION_STRING")?;
        let account = connection_string
            .account_name
            .map(str::to_string)
            .unwrap_or_else(|| parsed_account.to_string());
        let credentials = connection_string
            .storage_credentials()
            .context("credentials from connection string")?;
        return Ok((account, credentials));
    }

    if let (Some(name), Some(key)) = (&config.account_name, &config.account_key) {
        return Ok((
            name.clone(),
            StorageCredentials::access_key(name.clone(), key.clone()),
        ));
    }

    Err(FerryError::storage(
        "credential resolution",
        "no viable Azure credentials configured; set APP_AZURE_CONNECTION_STRING or APP_AZURE_ACCOUNT_NAME/APP_AZURE_ACCOUNT_KEY",
    )
    .into())
}

/// Extract the storage account name from an account URL like
/// `https://myaccount.blob.core.windows.net`.
fn account_from_url(account_url: &str) -> Result<String> {
    let host = account_url
        .strip_prefix("https://")
        .or_else(|| account_url.strip_prefix("http://"))
        .unwrap_or(account_url);
    let host = host.split('/').next().unwrap_or_default();
    let account = host.split(['.', ':']).next().unwrap_or_default();
    if account.is_empty() {
        bail!("Cannot determine storage account from URL '{account_url}'");
    }
    Ok(account.to_string())
}

fn is_public_endpoint(account_url: &str) -> bool {
    let host = account_url
        .strip_prefix("https://")
        .unwrap_or(account_url)
        .trim_end_matches('/');
    host.ends_with(".blob.core.windows.net")
}

/// In-memory test doubles for the upload boundary
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records uploaded blobs in memory.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryBlobStore {
        pub fn blob(&self, name: &str) -> Option<Vec<u8>> {
            self.blobs.lock().unwrap().get(name).cloned()
        }

        pub fn blob_count(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn upload_file(
            &self,
            blob_name: &str,
            source: &Path,
            _max_concurrency: usize,
        ) -> Result<u64> {
            let data = tokio::fs::read(source).await?;
            let size = data.len() as u64;
            self.blobs.lock().unwrap().insert(blob_name.to_string(), data);
            Ok(size)
        }
    }

    /// Rejects every upload.
    pub struct FailingBlobStore;

    #[async_trait]
    impl BlobStore for FailingBlobStore {
        async fn upload_file(
            &self,
            _blob_name: &str,
            _source: &Path,
            _max_concurrency: usize,
        ) -> Result<u64> {
            bail!("simulated upload failure")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_from_url_standard_endpoint() {
        assert_eq!(
            account_from_url("https://myacct.blob.core.windows.net").unwrap(),
            "myacct"
        );
        assert_eq!(
            account_from_url("https://myacct.blob.core.windows.net/").unwrap(),
            "myacct"
        );
    }

    #[test]
    fn test_account_from_url_custom_endpoint() {
        assert_eq!(
            account_from_url("http://127.0.0.1:10000/devstoreaccount1").unwrap(),
            "127"
        );
        assert_eq!(
            account_from_url("https://storage.example.internal").unwrap(),
            "storage"
        );
    }

    #[test]
    fn test_account_from_url_rejects_empty() {
        assert!(account_from_url("").is_err());
        assert!(account_from_url("https://").is_err());
    }

    #[test]
    fn test_is_public_endpoint() {
        assert!(is_public_endpoint("https://a.blob.core.windows.net"));
        assert!(is_public_endpoint("https://a.blob.core.windows.net/"));
        assert!(!is_public_endpoint("https://storage.example.internal"));
        assert!(!is_public_endpoint("http://127.0.0.1:10000"));
    }

    #[test]
    fn test_fallback_requires_some_credential() {
        let config = AzureConfig {
            account_url: "https://a.blob.core.windows.net".to_string(),
            container: "c".to_string(),
            connection_string: None,
            account_name: None,
            account_key: None,
        };
        assert!(fallback_credentials(&config, "a").is_err());
    }

    #[test]
    fn test_fallback_prefers_account_key_when_no_connection_string() {
        let config = AzureConfig {
            account_url: "https://a.blob.core.windows.net".to_string(),
            container: "c".to_string(),
            connection_string: None,
            account_name: Some("a".to_string()),
            account_key: Some(base64_key()),
        };
        let (account, _) = fallback_credentials(&config, "a").unwrap();
        assert_eq!(account, "a");
    }

    fn base64_key() -> String {
        // Any base64 payload works; credentials are not exercised offline.
        "dGVzdC1rZXktbWF0ZXJpYWw=".to_string()
    }
}
