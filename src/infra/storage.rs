use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
}

/// Durable storage for story media payloads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create-only write. `Ok(None)` when an object already exists at `key`;
    /// existing objects are never replaced.
    async fn upload(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<Option<StoredObject>>;

    /// Publicly resolvable URL for an uploaded object.
    fn public_url(&self, path: &str) -> Result<String>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    public_base: Url,
}

impl S3ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let s3_config = s3_builder.build();

        let client = Client::from_conf(s3_config);
        let public_endpoint = config
            .s3_public_endpoint
            .as_deref()
            .unwrap_or(&config.s3_endpoint);

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base: public_base_url(public_endpoint, &config.s3_bucket)?,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStorage {
    async fn upload(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<Option<StoredObject>> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(payload.len() as i64)
            .if_none_match("*")
            .body(ByteStream::from(payload))
            .send()
            .await;

        match result {
            Ok(_) => Ok(Some(StoredObject {
                path: key.to_string(),
            })),
            Err(err) if key_taken(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn public_url(&self, path: &str) -> Result<String> {
        join_object_path(&self.public_base, path)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await?;
        Ok(())
    }
}

/// 412 when the conditional put lost to an existing object, 409 when a
/// concurrent conditional put on the same key is still in flight.
fn key_taken<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .map(|response| matches!(response.status().as_u16(), 409 | 412))
        .unwrap_or(false)
}

/// `{endpoint}/{bucket}/`, accepting endpoints with or without a scheme.
pub fn public_base_url(endpoint: &str, bucket: &str) -> Result<Url> {
    let mut base = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{}", endpoint))?
    };
    base.path_segments_mut()
        .map_err(|_| anyhow!("public endpoint cannot be a base URL"))?
        .pop_if_empty()
        .push(bucket)
        .push("");
    Ok(base)
}

pub fn join_object_path(base: &Url, path: &str) -> Result<String> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("public endpoint cannot be a base URL"))?;
        segments.pop_if_empty();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            segments.push(segment);
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_urls_are_path_style() {
        let base = public_base_url("cdn.example.com", "stories").unwrap();
        let url = join_object_path(&base, "7f1c/1700000000123.jpg").unwrap();
        assert_eq!(url, "http://cdn.example.com/stories/7f1c/1700000000123.jpg");

        let base = public_base_url("https://s3.fr-par.example.com/", "media").unwrap();
        let url = join_object_path(&base, "a/b.mp4").unwrap();
        assert_eq!(url, "https://s3.fr-par.example.com/media/a/b.mp4");
    }
}
