//! Loading the key-schema mapping artifact at cold start.

use crate::config::{MappingConfig, MappingSource};
use crate::error::{SyncError, SyncResult};
use std::path::Path;
use tablesync_core::SchemaMappingStore;
use tracing::{debug, info, warn};

/// Load the mapping store described by `config`, bounded by its load timeout.
///
/// Without a configured source an empty store is returned and every table
/// falls back to key delivery order for document ids.
pub async fn load_mappings(config: &MappingConfig) -> SyncResult<SchemaMappingStore> {
    let load = async {
        match &config.source {
            MappingSource::None => {
                warn!("No mapping source configured, document ids follow key delivery order");
                Ok(SchemaMappingStore::empty())
            }
            MappingSource::File { path } => load_file(path).await,
            MappingSource::S3 {
                bucket,
                key,
                region,
            } => load_s3(bucket, key, region.as_deref()).await,
        }
    };

    let store = tokio::time::timeout(config.load_timeout(), load)
        .await
        .map_err(|_| {
            SyncError::MappingLoad(format!(
                "timed out after {}ms",
                config.load_timeout_ms
            ))
        })??;

    info!(tables = store.len(), "Loaded key-schema mappings");
    debug!(tables = ?store.tables(), "Mapped tables");
    Ok(store)
}

async fn load_file(path: &Path) -> SyncResult<SchemaMappingStore> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                path = %path.display(),
                "Mapping file not found, document ids follow key delivery order"
            );
            return Ok(SchemaMappingStore::empty());
        }
        Err(e) => {
            return Err(SyncError::MappingLoad(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    Ok(SchemaMappingStore::from_json_slice(&bytes)?)
}

#[cfg(feature = "s3")]
async fn load_s3(bucket: &str, key: &str, region: Option<&str>) -> SyncResult<SchemaMappingStore> {
    use aws_config::BehaviorVersion;

    let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        aws_config_loader = aws_config_loader.region(aws_config::Region::new(region.to_string()));
    }
    let aws_config = aws_config_loader.load().await;
    let client = aws_sdk_s3::Client::new(&aws_config);

    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            SyncError::MappingLoad(format!(
                "failed to fetch s3://{}/{}: {}",
                bucket,
                key,
                aws_sdk_s3::error::DisplayErrorContext(&e)
            ))
        })?;
    let bytes = object.body.collect().await.map_err(|e| {
        SyncError::MappingLoad(format!("failed to read s3://{}/{}: {}", bucket, key, e))
    })?;

    Ok(SchemaMappingStore::from_json_slice(&bytes.into_bytes())?)
}

#[cfg(not(feature = "s3"))]
async fn load_s3(bucket: &str, key: &str, _region: Option<&str>) -> SyncResult<SchemaMappingStore> {
    Err(SyncError::Config(format!(
        "mapping source s3://{}/{} needs the 's3' feature",
        bucket, key
    )))
}
