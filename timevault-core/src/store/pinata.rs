//! [`ContentStore`] backed by the Pinata pinning API and an IPFS gateway.

use std::time::Duration;

use reqwest::{multipart, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ContentStore, StoreError, StoreResult};
use crate::{http_request::HttpClient, primitives::ContentHash};

/// Production Pinata API endpoint.
pub const PINATA_API_URL: &str = "https://api.pinata.cloud";

/// API key pair for pinning.
#[derive(Clone)]
pub struct PinataCredentials {
    /// `pinata_api_key` header value.
    pub api_key: String,
    /// `pinata_secret_api_key` header value.
    pub secret_key: SecretString,
}

impl std::fmt::Debug for PinataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pins blobs with Pinata and reads them back through a gateway.
pub struct PinataStore {
    http: HttpClient,
    api_url: String,
    gateway_url: String,
    credentials: Option<PinataCredentials>,
}

impl PinataStore {
    /// Creates a store that can upload and fetch.
    #[must_use]
    pub fn new(credentials: PinataCredentials, gateway_url: &str) -> Self {
        Self {
            http: HttpClient::with_timeout(Duration::from_secs(60)),
            api_url: PINATA_API_URL.to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            credentials: Some(credentials),
        }
    }

    /// Creates a store that can only fetch. Uploads fail with
    /// [`StoreError::Rejected`].
    #[must_use]
    pub fn read_only(gateway_url: &str) -> Self {
        Self {
            http: HttpClient::new(),
            api_url: PINATA_API_URL.to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            credentials: None,
        }
    }

    /// Overrides the pinning API base URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

impl ContentStore for PinataStore {
    async fn upload(&self, bytes: Vec<u8>) -> StoreResult<ContentHash> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            StoreError::Rejected("no Pinata credentials configured".to_string())
        })?;

        let size = bytes.len();
        let url = format!("{}/pinning/pinFileToIPFS", self.api_url);
        // Multipart forms are single-use, so every attempt builds its own.
        let response = self
            .http
            .send(Method::POST, &url, |request| {
                let part = multipart::Part::bytes(bytes.clone()).file_name("timevault.bin");
                request
                    .header("pinata_api_key", &credentials.api_key)
                    .header("pinata_secret_api_key", credentials.secret_key.expose_secret())
                    .multipart(multipart::Form::new().part("file", part))
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected(format!("pinning failed ({status}): {body}")));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        if pinned.ipfs_hash.is_empty() {
            return Err(StoreError::InvalidResponse("empty IpfsHash".to_string()));
        }

        log::info!("pinned {size} bytes as {}", pinned.ipfs_hash);
        Ok(ContentHash::new(pinned.ipfs_hash))
    }

    async fn fetch(&self, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        let url = format!("{}/ipfs/{}", self.gateway_url, hash.as_str());
        let response = self.http.get(&url).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(hash.clone())),
            status if !status.is_success() => Err(StoreError::Http {
                url,
                status: Some(status.as_u16()),
                error: "gateway returned an error status".to_string(),
            }),
            _ => {
                let bytes = response.bytes().await.map_err(|e| StoreError::Http {
                    url,
                    status: None,
                    error: e.to_string(),
                })?;
                log::debug!("fetched {} bytes for {hash}", bytes.len());
                Ok(bytes.to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> PinataCredentials {
        PinataCredentials {
            api_key: "test-key".to_string(),
            secret_key: SecretString::from("test-secret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_upload_returns_ipfs_hash() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pinning/pinFileToIPFS")
            .match_header("pinata_api_key", "test-key")
            .match_header("pinata_secret_api_key", "test-secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"IpfsHash":"QmTestHash","PinSize":5,"Timestamp":"2025-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let store = PinataStore::new(credentials(), &server.url()).with_api_url(&server.url());
        let hash = store.upload(b"hello".to_vec()).await.unwrap();

        assert_eq!(hash, ContentHash::new("QmTestHash"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_unauthorized_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pinning/pinFileToIPFS")
            .with_status(401)
            .with_body(r#"{"error":"Invalid API key"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = PinataStore::new(credentials(), &server.url()).with_api_url(&server.url());
        let err = store.upload(b"hello".to_vec()).await.unwrap_err();

        assert!(matches!(err, StoreError::Rejected(reason) if reason.contains("401")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_retries_transient_server_error() {
        let mut server = mockito::Server::new_async().await;
        let unavailable = server
            .mock("POST", "/pinning/pinFileToIPFS")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let pinned = server
            .mock("POST", "/pinning/pinFileToIPFS")
            .match_body(mockito::Matcher::Regex("hello".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"IpfsHash":"QmRetried"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = PinataStore::new(credentials(), &server.url()).with_api_url(&server.url());
        let hash = store.upload(b"hello".to_vec()).await.unwrap();

        assert_eq!(hash, ContentHash::new("QmRetried"));
        unavailable.assert_async().await;
        pinned.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_gives_up_after_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pinning/pinFileToIPFS")
            .with_status(429)
            .expect(4)
            .create_async()
            .await;

        let store = PinataStore::new(credentials(), &server.url()).with_api_url(&server.url());
        let err = store.upload(b"hello".to_vec()).await.unwrap_err();

        assert!(matches!(err, StoreError::Http { status: Some(429), .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_read_only_store_cannot_upload() {
        let store = PinataStore::read_only("https://gateway.example");
        assert!(matches!(
            store.upload(vec![1]).await,
            Err(StoreError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_through_gateway() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ipfs/QmCipher")
            .with_status(200)
            .with_body("tvr1:AAAA")
            .create_async()
            .await;

        let store = PinataStore::read_only(&format!("{}/", server.url()));
        let bytes = store.fetch(&ContentHash::new("ipfs://QmCipher")).await.unwrap();

        assert_eq!(bytes, b"tvr1:AAAA");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_missing_blob() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ipfs/QmMissing")
            .with_status(404)
            .create_async()
            .await;

        let store = PinataStore::read_only(&server.url());
        let hash = ContentHash::new("QmMissing");
        assert_eq!(store.fetch(&hash).await, Err(StoreError::NotFound(hash)));
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ipfs/QmFlaky")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let store = PinataStore::read_only(&server.url());
        let err = store.fetch(&ContentHash::new("QmFlaky")).await.unwrap_err();

        assert!(matches!(err, StoreError::Http { status: Some(503), .. }));
        mock.assert_async().await;
    }
}
