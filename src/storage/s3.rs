//! S3 storage backend.
//!
//! Uploads go to the configured bucket; the appcast lives at the fixed
//! `appcast.xml` key and artifacts under `{version}/{name}.dmg`. A custom
//! endpoint can be supplied for S3-compatible stores.

use super::{APPCAST_KEY, Storage};
use crate::config::S3Config;
use crate::error::{Error, Result};
use anyhow::Context;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::path::Path;

/// S3 (or S3-compatible) bucket holding releases and the appcast.
pub struct S3Storage {
    client: s3::Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from the environment's bucket credentials.
    pub fn new(config: &S3Config) -> Self {
        let credentials = s3::config::Credentials::new(
            &config.access_key,
            &config.secret_access_key,
            None,
            None,
            "sparklecast-env",
        );

        let mut builder = s3::Config::builder()
            .behavior_version_latest()
            .region(s3::config::Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = s3::Client::from_conf(builder.build());

        Self {
            client,
            bucket: config.bucket_name.clone(),
        }
    }

    async fn put_object(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("reading {}", local_path.display()))
            .map_err(|source| Error::Upload {
                key: key.to_string(),
                source,
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upload {
                key: key.to_string(),
                source: anyhow::Error::new(e).context("put_object"),
            })?;

        Ok(())
    }
}

impl Storage for S3Storage {
    async fn deployed_appcast(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(APPCAST_KEY)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    // No prior publications; a fresh appcast will be created.
                    return Ok(None);
                }
                return Err(Error::Upload {
                    key: APPCAST_KEY.to_string(),
                    source: anyhow::Error::new(service_error).context("get_object"),
                });
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .context("reading appcast body")
            .map_err(|source| Error::Upload {
                key: APPCAST_KEY.to_string(),
                source,
            })?;

        let xml = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::FeedParse(format!("deployed appcast is not UTF-8: {e}")))?;

        Ok(Some(xml))
    }

    async fn upload_artifact(&self, local_path: &Path, key: &str) -> Result<()> {
        self.put_object(local_path, key).await?;
        log::debug!("Uploaded {} to bucket {}", key, self.bucket);
        Ok(())
    }

    async fn upload_appcast(&self, local_path: &Path) -> Result<()> {
        self.put_object(local_path, APPCAST_KEY).await?;
        log::debug!("Uploaded the appcast file to bucket {}", self.bucket);
        Ok(())
    }
}
