//! S3 (and S3-compatible) object store.

use super::{content_type_for_key, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{RehostError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

/// Object store backed by the AWS SDK client.
///
/// The client is cheap to clone and safe to share across workers.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from configuration, falling back to the default AWS
    /// provider chain for anything not set explicitly.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            // Custom endpoints are S3-compatible services that expect path-style addressing.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret.clone(),
                    None,
                    None,
                    "rehost-config",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(RehostError::Config {
                    message: "storage.access_key_id and storage.secret_access_key must be set together"
                        .to_string(),
                })
            }
        }

        info!(
            "S3 client created (endpoint: {})",
            config.endpoint_url.as_deref().unwrap_or("aws default")
        );
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<u16> {
        let size = bytes.len();
        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for_key(key))
            .body(ByteStream::from(bytes))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Put {} bytes to s3://{}/{}", size, bucket, key);
                Ok(200)
            }
            Err(err) => failed_put_status(
                err.raw_response().map(|raw| raw.status().as_u16()),
                key,
                format!("{:?}", err),
            ),
        }
    }
}

/// Status to report for a failed put.
///
/// A service response outside 2xx is passed through for the caller to judge.
/// Anything else, including an SDK error on a 2xx response, is an
/// `ObjectStore` error so the asset is never recorded as stored.
fn failed_put_status(raw_status: Option<u16>, key: &str, detail: String) -> Result<u16> {
    match raw_status {
        Some(status) if !(200..300).contains(&status) => Ok(status),
        _ => Err(RehostError::ObjectStore {
            key: key.to_string(),
            message: detail,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_passes_through() {
        assert_eq!(failed_put_status(Some(503), "k", String::new()).unwrap(), 503);
        assert_eq!(failed_put_status(Some(403), "k", String::new()).unwrap(), 403);
    }

    #[test]
    fn test_error_on_success_status_is_not_stored() {
        let err = failed_put_status(Some(200), "a/b.png", "parse failure".into()).unwrap_err();
        assert!(matches!(err, RehostError::ObjectStore { ref key, .. } if key == "a/b.png"));
        assert!(failed_put_status(Some(204), "k", String::new()).is_err());
    }

    #[test]
    fn test_error_without_response() {
        let err = failed_put_status(None, "k", "dispatch failure".into()).unwrap_err();
        assert!(err.is_fatal());
    }
}
