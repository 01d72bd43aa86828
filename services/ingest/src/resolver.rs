//! Fetching asset sources into local temporary files

use crate::error::ResolveError;
use crate::media_file::MediaSource;
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use reqwest::Client;
use reqwest::header::REFERER;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Turns a source url into a readable local file
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(
        &self,
        source_url: &str,
        referer: Option<&str>,
    ) -> Result<MediaSource, ResolveError>;
}

/// Write downloaded bytes into a temporary file
async fn spool(chunks: &[u8]) -> Result<MediaSource, ResolveError> {
    let temp = NamedTempFile::new()?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);
    file.write_all(chunks).await?;
    file.flush().await?;
    Ok(MediaSource::from_temp(temp))
}

/// Downloads `http://` and `https://` sources
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: Client,
    max_size: u64,
}

impl HttpResolver {
    pub fn new(timeout: Duration, max_size: u64) -> Result<Self, ResolveError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, max_size })
    }
}

#[async_trait]
impl SourceResolver for HttpResolver {
    async fn resolve(
        &self,
        source_url: &str,
        referer: Option<&str>,
    ) -> Result<MediaSource, ResolveError> {
        info!(url = source_url, "Downloading source");

        let mut request = self.client.get(source_url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                url: source_url.to_string(),
                status: status.as_u16(),
            });
        }

        if response
            .content_length()
            .is_some_and(|length| length > self.max_size)
        {
            return Err(ResolveError::TooLarge { max: self.max_size });
        }

        let temp = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_size {
                return Err(ResolveError::TooLarge { max: self.max_size });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url = source_url, bytes = written, "Download complete");
        Ok(MediaSource::from_temp(temp))
    }
}

/// Split `s3://bucket/key` into its bucket and key
pub fn parse_s3_url(url: &str) -> Option<(&str, &str)> {
    let (bucket, key) = url.strip_prefix("s3://")?.split_once('/')?;
    (!bucket.is_empty() && !key.is_empty()).then_some((bucket, key))
}

/// Fetches `s3://bucket/key` sources
#[derive(Clone)]
pub struct S3Resolver {
    client: S3Client,
    max_size: u64,
}

impl S3Resolver {
    pub fn new(client: S3Client, max_size: u64) -> Self {
        Self { client, max_size }
    }
}

#[async_trait]
impl SourceResolver for S3Resolver {
    async fn resolve(
        &self,
        source_url: &str,
        _referer: Option<&str>,
    ) -> Result<MediaSource, ResolveError> {
        let (bucket, key) = parse_s3_url(source_url)
            .ok_or_else(|| ResolveError::UnsupportedScheme(source_url.to_string()))?;

        info!(bucket, key, "Fetching source from S3");

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ResolveError::Storage(e.to_string()))?;

        if output
            .content_length()
            .is_some_and(|length| u64::try_from(length).unwrap_or(0) > self.max_size)
        {
            return Err(ResolveError::TooLarge { max: self.max_size });
        }

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ResolveError::Storage(e.to_string()))?
            .into_bytes();
        if bytes.len() as u64 > self.max_size {
            return Err(ResolveError::TooLarge { max: self.max_size });
        }

        spool(&bytes).await
    }
}

/// Routes each source url to the resolver for its scheme
#[derive(Clone)]
pub struct SchemeResolver {
    http: HttpResolver,
    s3: Option<S3Resolver>,
}

impl SchemeResolver {
    pub fn new(http: HttpResolver, s3: Option<S3Resolver>) -> Self {
        Self { http, s3 }
    }
}

#[async_trait]
impl SourceResolver for SchemeResolver {
    async fn resolve(
        &self,
        source_url: &str,
        referer: Option<&str>,
    ) -> Result<MediaSource, ResolveError> {
        if source_url.starts_with("http://") || source_url.starts_with("https://") {
            return self.http.resolve(source_url, referer).await;
        }

        match (&self.s3, source_url.starts_with("s3://")) {
            (Some(s3), true) => s3.resolve(source_url, referer).await,
            _ => Err(ResolveError::UnsupportedScheme(source_url.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve a single canned HTTP response and report the raw request
    async fn serve_once(status: &'static str, body: &'static [u8]) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());

            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{}/image.png", addr), rx)
    }

    fn resolver(max_size: u64) -> HttpResolver {
        HttpResolver::new(Duration::from_secs(5), max_size).unwrap()
    }

    #[tokio::test]
    async fn test_http_download_sends_referer() {
        let (url, request) = serve_once("200 OK", b"\x89PNG\r\n\x1a\nrest").await;

        let source = resolver(1024)
            .resolve(&url, Some("https://example.com/post/1"))
            .await
            .unwrap();

        let mut content = Vec::new();
        source.reader().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"\x89PNG\r\n\x1a\nrest");

        let request = request.await.unwrap().to_lowercase();
        assert!(request.contains("referer: https://example.com/post/1"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (url, _request) = serve_once("404 Not Found", b"").await;

        let result = resolver(1024).resolve(&url, None).await;
        assert!(matches!(
            result,
            Err(ResolveError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_size_limit() {
        let (url, _request) = serve_once("200 OK", b"0123456789").await;

        let result = resolver(4).resolve(&url, None).await;
        assert!(matches!(result, Err(ResolveError::TooLarge { max: 4 })));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let resolver = SchemeResolver::new(resolver(1024), None);

        for url in ["ftp://example.com/a.png", "s3://bucket/key", "file://a.png"] {
            let result = resolver.resolve(url, None).await;
            assert!(matches!(result, Err(ResolveError::UnsupportedScheme(_))));
        }
    }

    #[test]
    fn test_parse_s3_url() {
        assert_eq!(
            parse_s3_url("s3://media/uploads/a.png"),
            Some(("media", "uploads/a.png"))
        );
        assert_eq!(parse_s3_url("s3://media"), None);
        assert_eq!(parse_s3_url("s3:///key"), None);
        assert_eq!(parse_s3_url("https://media/a.png"), None);
    }
}
