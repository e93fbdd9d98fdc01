use std::time::{Duration, Instant};

use chrono::Local;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cache::StaleCache;
use crate::domain::{RawFeed, Source};
use crate::error::{DataError, FetchError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub trait FeedClient: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Clone)]
pub struct HttpFeedClient {
    client: Client,
}

impl HttpFeedClient {
    pub fn new(timeout: Duration) -> Result<Self, DataError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("covid19-data/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DataError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DataError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

impl FeedClient for HttpFeedClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::from_reqwest(&err))?;
        if !response.status().is_success() {
            return Err(FetchError::InvalidUrl {
                status: response.status().as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| FetchError::from_reqwest(&err))?;
        Ok(bytes.to_vec())
    }
}

/// Downloads one feed. The payload is addressed to its cache path but not
/// written there; `StaleCache::store` does that once the refresh commits.
pub fn fetch(
    client: &dyn FeedClient,
    cache: &StaleCache,
    source: &Source,
) -> Result<RawFeed, DataError> {
    tracing::info!(source = %source.id, url = %source.url, "fetching feed");
    let start = Instant::now();
    let bytes = client.get(&source.url).map_err(|error| {
        tracing::warn!(source = %source.id, %error, "fetch failed");
        DataError::Fetch {
            source_id: source.id,
            error,
        }
    })?;
    tracing::info!(
        source = %source.id,
        bytes = bytes.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "feed downloaded"
    );
    Ok(RawFeed {
        source: source.id,
        path: cache.feed_path(source),
        bytes,
        modified: Local::now(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::{SourceId, SourceRegistry};

    struct StaticClient(Result<Vec<u8>, FetchError>);

    impl FeedClient for StaticClient {
        fn get(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.0.clone()
        }
    }

    #[test]
    fn fetch_addresses_payload_to_cache_path() {
        let temp = tempfile::tempdir().unwrap();
        let cache = StaleCache::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let registry = SourceRegistry::default();
        let source = registry.get(SourceId::IndiaDaily).unwrap();
        let client = StaticClient(Ok(b"{}".to_vec()));

        let feed = fetch(&client, &cache, source).unwrap();
        assert_eq!(feed.source, SourceId::IndiaDaily);
        assert_eq!(feed.path, cache.feed_path(source));
        assert!(!cache.exists(source));
    }

    #[test]
    fn fetch_keeps_failure_kind() {
        let cache = StaleCache::new(Utf8PathBuf::from("/tmp/covid19-cache"));
        let registry = SourceRegistry::default();
        let source = registry.get(SourceId::Global).unwrap();
        let client = StaticClient(Err(FetchError::Timeout("slow".to_string())));

        let err = fetch(&client, &cache, source).unwrap_err();
        assert_matches!(
            err,
            DataError::Fetch {
                source_id: SourceId::Global,
                error: FetchError::Timeout(_)
            }
        );
    }

    /// Answers one request with `response` and hands back the request bytes.
    fn spawn_raw_server(response: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0_u8; 4096];
                let read = stream.read(&mut request).unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&request[..read]).into_owned());
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        (format!("http://{addr}/feed.json"), rx)
    }

    fn client(timeout: Duration) -> HttpFeedClient {
        HttpFeedClient::new(timeout).unwrap()
    }

    #[test]
    fn success_returns_body_and_sends_user_agent() {
        let (url, request) = spawn_raw_server(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Length: 2\r\n",
            "Connection: close\r\n",
            "\r\n",
            "{}",
        ));

        let body = client(DEFAULT_TIMEOUT).get(&url).unwrap();
        assert_eq!(body, b"{}");
        let request = request.recv().unwrap().to_lowercase();
        assert!(request.contains("user-agent: covid19-data/"));
    }

    #[test]
    fn not_found_is_invalid_url() {
        let (url, _request) = spawn_raw_server(concat!(
            "HTTP/1.1 404 Not Found\r\n",
            "Content-Length: 0\r\n",
            "Connection: close\r\n",
            "\r\n",
        ));

        let err = client(DEFAULT_TIMEOUT).get(&url).unwrap_err();
        assert_eq!(err, FetchError::InvalidUrl { status: 404 });
    }

    #[test]
    fn refused_port_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(DEFAULT_TIMEOUT)
            .get(&format!("http://{addr}/feed.json"))
            .unwrap_err();
        assert_matches!(err, FetchError::ConnectionFailure(_));
    }

    #[test]
    fn silent_server_is_timeout() {
        // Bound but never read from: the connection opens and no reply comes.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let err = client(Duration::from_millis(300))
            .get(&format!("http://{addr}/feed.json"))
            .unwrap_err();
        assert_matches!(err, FetchError::Timeout(_));
        drop(listener);
    }

    #[test]
    fn malformed_url_is_unknown_transport() {
        let err = client(DEFAULT_TIMEOUT).get("not a url").unwrap_err();
        assert_matches!(err, FetchError::UnknownTransport(_));
    }
}
