//! Endpoint layout of the package registry.

use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::error::BpmError;
use crate::http::HttpClient;
use crate::manifest::RemoteManifest;

pub const DEFAULT_REGISTRY: &str = "https://registry.bpluslang.org";

/// Response header carrying the hex SHA-256 of a downloaded archive.
pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

/// One entry of a search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

pub struct Registry {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl Registry {
    pub fn new(http: HttpClient, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{registry}/packages/{name}/download`, with `?version=` when pinned.
    pub fn download_url(&self, name: &str, version: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint(&["packages", name, "download"])?;
        if let Some(version) = version {
            url.query_pairs_mut().append_pair("version", version);
        }
        Ok(url)
    }

    /// Streams the archive for `name` into the writer from `create_writer`.
    ///
    /// Returns the digest announced by the registry, if any. Any non-2xx
    /// response becomes [`BpmError::PackageNotFound`].
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download<W, F>(
        &self,
        name: &str,
        version: Option<&str>,
        create_writer: F,
    ) -> Result<Option<String>>
    where
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        let url = self.download_url(name, version)?;
        info!("Downloading {} from {}", name, url);

        let download = match self.http.download_file(url.as_str(), create_writer).await {
            Ok(download) => download,
            Err(e) => {
                let rejected = matches!(
                    BpmError::find(&e),
                    Some(BpmError::NetworkError {
                        status: Some(_),
                        ..
                    })
                );
                if rejected {
                    debug!("Registry rejected download of {}: {:#}", name, e);
                    return Err(BpmError::PackageNotFound {
                        name: name.to_string(),
                    }
                    .into());
                }
                return Err(e);
            }
        };

        let digest = download
            .headers
            .get(CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        debug!("Downloaded {} bytes, digest {:?}", download.bytes, digest);
        Ok(digest)
    }

    /// `GET {registry}/api/v1/packages/search?q={query}`.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let url = self.endpoint(&["api", "v1", "packages", "search"])?;
        self.http.get_json(url.as_str(), &[("q", query)]).await
    }

    /// POSTs the registry form of a manifest. Any non-2xx response becomes
    /// [`BpmError::PublishRejected`].
    #[tracing::instrument(skip(self, manifest), fields(name = %manifest.name))]
    pub async fn publish(&self, manifest: &RemoteManifest) -> Result<()> {
        let url = self.endpoint(&["api", "v1", "packages", "publish"])?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Registry token contains invalid characters")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else {
            debug!("Publishing without a registry token");
        }

        match self.http.post_json(url.as_str(), manifest, headers).await {
            Ok(status) => {
                debug!("Registry accepted {} with {}", manifest.name, status);
                Ok(())
            }
            Err(e) => match BpmError::find(&e) {
                Some(BpmError::NetworkError {
                    status: Some(status),
                    ..
                }) => Err(BpmError::PublishRejected { status: *status }.into()),
                _ => Err(e),
            },
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid registry URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| BpmError::InputInvalid(format!("Invalid registry URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;

    fn registry(url: &str, token: Option<&str>) -> Registry {
        Registry::new(
            HttpClient::new(Client::new()),
            url,
            token.map(String::from),
        )
    }

    #[test]
    fn test_download_url() {
        let registry = registry("https://registry.example.org/", None);
        assert_eq!(
            registry.download_url("fmt", None).unwrap().as_str(),
            "https://registry.example.org/packages/fmt/download"
        );
        assert_eq!(
            registry.download_url("fmt", Some("1.2.0")).unwrap().as_str(),
            "https://registry.example.org/packages/fmt/download?version=1.2.0"
        );
    }

    #[test]
    fn test_download_url_keeps_base_path() {
        let registry = registry("http://localhost:8080/mirror", None);
        assert_eq!(
            registry.download_url("fmt", None).unwrap().as_str(),
            "http://localhost:8080/mirror/packages/fmt/download"
        );
    }

    #[tokio::test]
    async fn test_download_returns_digest_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/packages/fmt/download")
            .with_status(200)
            .with_header("X-Checksum-Sha256", "ABC123")
            .with_body("archive")
            .create_async()
            .await;

        let mut buffer = Vec::new();
        let digest = registry(&server.url(), None)
            .download("fmt", None, || Ok(&mut buffer))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(digest.as_deref(), Some("ABC123"));
        assert_eq!(buffer, b"archive");
    }

    #[tokio::test]
    async fn test_download_without_digest() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/packages/fmt/download")
            .with_status(200)
            .with_body("archive")
            .create_async()
            .await;

        let digest = registry(&server.url(), None)
            .download("fmt", None, || Ok(std::io::sink()))
            .await
            .unwrap();

        assert!(digest.is_none());
    }

    #[tokio::test]
    async fn test_download_error_status_is_package_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/packages/missing/download")
            .with_status(500)
            .create_async()
            .await;

        let err = registry(&server.url(), None)
            .download("missing", None, || Ok(std::io::sink()))
            .await
            .unwrap_err();

        assert_eq!(
            BpmError::find(&err),
            Some(&BpmError::PackageNotFound {
                name: "missing".into()
            })
        );
    }

    #[tokio::test]
    async fn test_download_connection_failure_stays_network_error() {
        let err = registry("http://127.0.0.1:1", None)
            .download("fmt", None, || Ok(std::io::sink()))
            .await
            .unwrap_err();

        assert!(matches!(
            BpmError::find(&err),
            Some(BpmError::NetworkError { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_search() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/packages/search")
            .match_query(mockito::Matcher::UrlEncoded("q".into(), "fmt".into()))
            .with_status(200)
            .with_body(
                r#"[{"name":"fmt","version":"1.0.0","description":"Formatting","author":"Ana"},
                    {"name":"fmt-extra","version":"0.2.0"}]"#,
            )
            .create_async()
            .await;

        let hits = registry(&server.url(), None).search("fmt").await.unwrap();

        mock.assert_async().await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].author.as_deref(), Some("Ana"));
        assert_eq!(hits[1].description, None);
    }

    #[tokio::test]
    async fn test_publish_with_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/packages/publish")
            .match_header("authorization", "Bearer s3cret")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "name": "fmt",
                "version": "1.0.0"
            })))
            .with_status(200)
            .create_async()
            .await;

        let manifest = RemoteManifest {
            name: "fmt".into(),
            version: "1.0.0".into(),
            description: None,
            author: None,
            license: None,
        };
        registry(&server.url(), Some("s3cret"))
            .publish(&manifest)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/packages/publish")
            .with_status(403)
            .create_async()
            .await;

        let manifest = RemoteManifest {
            name: "fmt".into(),
            version: "1.0.0".into(),
            description: None,
            author: None,
            license: None,
        };
        let err = registry(&server.url(), None)
            .publish(&manifest)
            .await
            .unwrap_err();

        assert_eq!(
            BpmError::find(&err),
            Some(&BpmError::PublishRejected { status: 403 })
        );
    }
}
