use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{MemoryStore, PgStore, Store};
use crate::storage::{MemoryStorage, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match &config.database_url {
            Some(url) => Arc::new(PgStore::connect(url).await?) as Arc<dyn Store>,
            None => {
                warn!("DATABASE_URL not set; data is kept in memory only");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        let storage = match &config.s3 {
            Some(s3) => {
                info!(endpoint = %s3.endpoint, bucket = %s3.bucket, "using S3 image storage");
                Arc::new(S3Storage::new(s3).await?) as Arc<dyn StorageClient>
            }
            None => {
                warn!("MINIO_ENDPOINT not set; images are kept in memory only");
                Arc::new(MemoryStorage::default()) as Arc<dyn StorageClient>
            }
        };

        Ok(Self::from_parts(store, config, storage))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            store,
            config,
            storage,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state with fixed JWT settings; also returns the storage for inspection.
    pub fn fake_with_storage() -> (Self, Arc<MemoryStorage>) {
        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            s3: None,
            image_url_ttl_secs: 60,
        });
        let storage = Arc::new(MemoryStorage::default());
        let state = Self::from_parts(
            Arc::new(MemoryStore::new()),
            config,
            storage.clone() as Arc<dyn StorageClient>,
        );
        (state, storage)
    }

    pub fn fake() -> Self {
        Self::fake_with_storage().0
    }
}
