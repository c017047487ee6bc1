use anyhow::{anyhow, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    public_endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PresignedRequest {
    pub url: String,
    pub headers: Vec<PresignedHeader>,
}

#[derive(Debug, Serialize)]
pub struct PresignedHeader {
    pub name: String,
    pub value: String,
}

impl ObjectStorage {
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
        match (&config.s3_access_key_id, &config.s3_secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                s3_builder = s3_builder.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "bambiland-static",
                ));
            }
            _ => {
                if let Some(provider) = shared_config.credentials_provider() {
                    s3_builder = s3_builder.credentials_provider(provider);
                }
            }
        }
        let s3_config = s3_builder.build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
            public_endpoint: config.s3_public_endpoint.clone(),
        })
    }

    pub async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    pub async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expires_in_seconds: u64,
    ) -> Result<PresignedRequest> {
        let presign_config = PresigningConfig::expires_in(Duration::from_secs(expires_in_seconds))?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(content_length)
            .presigned(presign_config)
            .await?;

        let headers = presigned
            .headers()
            .map(|(name, value)| PresignedHeader {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect();

        Ok(PresignedRequest {
            url: self.public_url(presigned.uri()),
            headers,
        })
    }

    pub async fn presign_get(&self, key: &str, expires_in_seconds: u64) -> Result<String> {
        let presign_config = PresigningConfig::expires_in(Duration::from_secs(expires_in_seconds))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await?;
        Ok(self.public_url(presigned.uri()))
    }

    fn public_url(&self, uri: &str) -> String {
        let Some(public_endpoint) = self.public_endpoint.as_deref() else {
            return uri.to_string();
        };
        match rewrite_presigned_url(uri, public_endpoint) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                tracing::warn!(error = ?err, "failed to rewrite presigned URL");
                uri.to_string()
            }
        }
    }
}

fn rewrite_presigned_url(original: &str, public_endpoint: &str) -> Result<String> {
    let mut original_url = Url::parse(original)?;
    let public_url = if public_endpoint.contains("://") {
        Url::parse(public_endpoint)?
    } else {
        Url::parse(&format!("http://{}", public_endpoint))?
    };

    original_url
        .set_scheme(public_url.scheme())
        .map_err(|_| anyhow!("invalid scheme for public endpoint"))?;
    original_url
        .set_host(public_url.host_str())
        .map_err(|_| anyhow!("invalid host for public endpoint"))?;
    original_url.set_port(public_url.port()).ok();

    Ok(original_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::rewrite_presigned_url;

    #[test]
    fn rewrite_swaps_host_and_keeps_signature() {
        let rewritten = rewrite_presigned_url(
            "http://minio:9000/bambiland/uploads/a.jpg?X-Amz-Signature=abc",
            "https://cdn.example.com",
        )
        .unwrap();
        assert_eq!(
            rewritten,
            "https://cdn.example.com/bambiland/uploads/a.jpg?X-Amz-Signature=abc"
        );
    }

    #[test]
    fn rewrite_accepts_bare_host_with_port() {
        let rewritten =
            rewrite_presigned_url("http://minio:9000/b/k.png", "localhost:9100").unwrap();
        assert_eq!(rewritten, "http://localhost:9100/b/k.png");
    }
}
