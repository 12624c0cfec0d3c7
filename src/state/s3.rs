//! S3-based state storage backend.
//!
//! Remote state for distributed runs and team collaboration. Each resource
//! is stored as its own object under the configured prefix, so S3's atomic
//! per-object PUT gives the same per-entry commit guarantee as the local
//! backend.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{GroundplanError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{ResourceState, StateSnapshot};

/// Key prefix for per-resource documents.
const RESOURCES_PREFIX: &str = "resources/";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        let client = Client::new(&config);

        Ok(Self::with_client(client, bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| {
                let p = p.trim_matches('/');
                if p.is_empty() {
                    String::new()
                } else {
                    format!("{p}/")
                }
            })
            .unwrap_or_default();

        Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets the key of the document for a resource identifier.
    fn resource_key(&self, id: &str) -> String {
        self.key(&format!("{RESOURCES_PREFIX}{id}.json"))
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    GroundplanError::State(StateError::backend(format!(
                        "Failed to read S3 object: {e}"
                    )))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    GroundplanError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(GroundplanError::State(StateError::backend(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| {
                GroundplanError::State(StateError::backend(format!("S3 put error: {e}")))
            })?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                GroundplanError::State(StateError::backend(format!("S3 delete error: {e}")))
            })?;

        Ok(())
    }

    /// Lists all per-resource document keys under the prefix.
    async fn list_resource_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        let list_prefix = self.key(RESOURCES_PREFIX);

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix);

            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                GroundplanError::State(StateError::backend(format!("S3 list error: {e}")))
            })?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = StateSnapshot::new();

        for key in self.list_resource_keys().await? {
            let Some(content) = self.get_object(&key).await? else {
                // Deleted between list and get; skip
                continue;
            };

            let state: ResourceState = serde_json::from_str(&content).map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to parse state object {key}: {e}"),
                })
            })?;

            snapshot.insert(state.id.clone(), state);
        }

        info!(
            "Loaded {} resource state entries from s3://{}/{}",
            snapshot.len(),
            self.bucket,
            self.prefix
        );

        Ok(snapshot)
    }

    async fn save(&self, state: &ResourceState) -> Result<()> {
        let key = self.resource_key(&state.id);
        debug!("Saving state entry to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            GroundplanError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        self.put_object(&key, &content).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let key = self.resource_key(id);
        debug!("Deleting state entry s3://{}/{key}", self.bucket);

        self.delete_object(&key).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let key = self.key(LOCK_KEY);

        // Check for existing lock
        if let Some(content) = self.get_object(&key).await? {
            let existing: LockInfo = serde_json::from_str(&content).map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to parse lock: {e}"),
                })
            })?;

            if !existing.is_expired() {
                return Err(GroundplanError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);

        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            GroundplanError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        self.put_object(&key, &content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing: LockInfo = serde_json::from_str(&content).map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to parse lock: {e}"),
                })
            })?;

            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }

        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to parse lock: {e}"),
                })
            })?;

            return Ok(Some(lock_info));
        }

        Ok(None)
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.lock_info().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
