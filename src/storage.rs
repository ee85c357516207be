//! Object-storage fetch client.
//!
//! Registration pulls the reference audio from a bucket by key. The HTTP
//! layer depends on the [`ObjectStorage`] trait so tests can substitute a
//! canned implementation; the production client issues a virtual-host-style
//! GET against the configured bucket endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::AppConfig;
use crate::error::AppError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch-by-key contract consumed by the registration handler.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Downloads the object stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError>;
}

/// Bucket client fetching objects over HTTPS.
///
/// Access is anonymous or bearer-token based; request signing is out of scope
/// here and belongs in a dedicated client behind the same trait.
pub struct OssBucket {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl OssBucket {
    /// Builds a bucket client from configuration.
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            endpoint: cfg.oss_endpoint.clone(),
            bucket: cfg.oss_bucket.clone(),
            token: cfg.oss_token.clone(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        object_url(&self.endpoint, &self.bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for OssBucket {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let url = self.object_url(key);

        let mut request = self.client.get(&url);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            AppError::storage(format!("failed to fetch object {key:?}: {err}"))
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(AppError::storage(format!("object {key:?} not found")));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::storage(format!(
                    "access to object {key:?} denied; check OSS_ACCESS_TOKEN"
                )));
            }
            status => {
                return Err(AppError::storage(format!(
                    "object fetch for {key:?} failed with HTTP status {status}"
                )));
            }
        }

        let bytes = response.bytes().await.map_err(|err| {
            AppError::storage(format!("failed reading object {key:?}: {err}"))
        })?;
        if bytes.is_empty() {
            return Err(AppError::storage(format!("object {key:?} is empty")));
        }

        Ok(bytes.to_vec())
    }
}

/// Builds the virtual-host-style object URL `https://{bucket}.{endpoint}/{key}`.
///
/// An endpoint already carrying a scheme keeps it; otherwise `https` is
/// assumed.
fn object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    let (scheme, host) = match endpoint.split_once("://") {
        Some((scheme, host)) => (scheme, host),
        None => ("https", endpoint),
    };
    format!(
        "{scheme}://{bucket}.{}/{}",
        host.trim_matches('/'),
        key.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::object_url;

    #[test]
    fn object_url_is_virtual_host_style() {
        assert_eq!(
            object_url("oss-cn-hangzhou.aliyuncs.com", "voices", "ref/alice.wav"),
            "https://voices.oss-cn-hangzhou.aliyuncs.com/ref/alice.wav"
        );
    }

    #[test]
    fn object_url_keeps_explicit_scheme_and_trims_edges() {
        assert_eq!(
            object_url("http://localhost:9000/", "voices", "/alice.wav"),
            "http://voices.localhost:9000/alice.wav"
        );
    }
}
