use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, ClientBuilder};
use tracing::{debug, warn};

use crate::error::{Result, SegmentError};

/// Where source videos come from.
pub trait VideoSource: Send + Sync {
    /// Downloads `url` into `dest` and returns the number of bytes written.
    /// On failure `dest` does not exist.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = client_builder(user_agent, timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Some hosts reject default client identifiers, so the user agent is always
/// set explicitly.
pub fn client_builder(user_agent: &str, timeout: Duration) -> ClientBuilder {
    Client::builder().user_agent(user_agent).timeout(timeout)
}

impl VideoSource for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let fail = |reason: String| SegmentError::Fetch {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }

        let written = File::create(dest)
            .map_err(|e| e.to_string())
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                let written = response.copy_to(&mut writer).map_err(|e| e.to_string())?;
                writer.flush().map_err(|e| e.to_string())?;
                Ok(written)
            });

        match written {
            Ok(0) => {
                discard(dest);
                Err(fail("empty response body".into()))
            }
            Ok(bytes) => {
                debug!("Downloaded {} bytes from {} to {:?}", bytes, url, dest);
                Ok(bytes)
            }
            Err(reason) => {
                discard(dest);
                Err(fail(reason))
            }
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) SegmenterTest/1.0";

    fn fetcher() -> HttpFetcher {
        let client = client_builder(UA, Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap();
        HttpFetcher::with_client(client)
    }

    /// Serves exactly one canned response and hands back the raw request.
    fn serve_once(response: &'static [u8]) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response).unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/clips/ad.mp4"), handle)
    }

    #[test]
    fn test_fetch_writes_body_with_browser_user_agent() -> anyhow::Result<()> {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nvideo-bytes",
        );
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("source.video");

        let written = fetcher().fetch(&url, &dest)?;

        assert_eq!(written, 11);
        assert_eq!(fs::read(&dest)?, b"video-bytes");
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /clips/ad.mp4"));
        assert!(request.contains(&format!("user-agent: {}", UA.to_lowercase())));
        Ok(())
    }

    #[test]
    fn test_non_success_status_leaves_no_file() -> anyhow::Result<()> {
        let (url, server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        );
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("source.video");

        let err = fetcher().fetch(&url, &dest).unwrap_err();

        server.join().unwrap();
        assert!(matches!(err, SegmentError::Fetch { ref reason, .. } if reason.contains("404")));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_empty_body_is_rejected() -> anyhow::Result<()> {
        let (url, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("source.video");

        assert!(fetcher().fetch(&url, &dest).is_err());
        server.join().unwrap();
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_connection_refused_is_fetch_error() -> anyhow::Result<()> {
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("source.video");

        let err = fetcher()
            .fetch(&format!("http://{addr}/gone.mp4"), &dest)
            .unwrap_err();

        assert!(matches!(err, SegmentError::Fetch { .. }));
        assert!(!dest.exists());
        Ok(())
    }
}
