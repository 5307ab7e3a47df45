use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::granule::{Granule, MemoryGranule};
use crate::models::SubsetConfig;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use geo::{polygon, MultiPolygon};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

/// Authorization header value for username `user` and password `secret`.
pub(crate) const TEST_AUTHORIZATION: &str = "Basic dXNlcjpzZWNyZXQ=";

/// Create a SubsetConfig with all fields set, selecting longitude and latitude from BEAM0000.
pub(crate) fn get_test_subset_config() -> SubsetConfig {
    SubsetConfig {
        layers: vec!["lon_lowestmode".to_string(), "lat_lowestmode".to_string()],
        flags: BTreeMap::from([("quality_flag".to_string(), 1.into())]),
        stride: 1,
        beams: Some(vec!["BEAM0000".to_string()]),
    }
}

/// Create a granule with two beams of positions and quality flags.
pub(crate) fn get_test_granule() -> MemoryGranule {
    MemoryGranule::new()
        .with_layer("BEAM0000", "lon_lowestmode", [0.5, 1.5, 0.25, 0.75])
        .with_layer("BEAM0000", "lat_lowestmode", [0.5, 0.5, 0.25, 2.0])
        .with_layer("BEAM0000", "quality_flag", [1_i64, 1, 0, 1])
        .with_layer("BEAM0101", "lon_lowestmode", [0.1, 0.9])
        .with_layer("BEAM0101", "lat_lowestmode", [0.9, 0.1])
        .with_layer("BEAM0101", "quality_flag", [1_i64, 1])
}

/// Create a boundary covering the unit square.
pub(crate) fn get_test_boundary() -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: 0.0, y: 0.0),
        (x: 1.0, y: 0.0),
        (x: 1.0, y: 1.0),
        (x: 0.0, y: 1.0)
    ]])
}

/// A [Fetcher] serving in-memory granules by URL and counting fetches.
///
/// URLs without a granule or error fail with a 404 transfer error.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    granules: HashMap<String, MemoryGranule>,
    errors: Mutex<HashMap<String, FetchError>>,
    panics: HashSet<String>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    /// Serve the test granule at each URL.
    pub(crate) fn new(urls: &[&str]) -> Self {
        let mut fetcher = Self::default();
        for url in urls {
            fetcher
                .granules
                .insert(url.to_string(), get_test_granule());
        }
        fetcher
    }

    /// Serve a specific granule at a URL.
    pub(crate) fn with_granule(mut self, url: &str, granule: MemoryGranule) -> Self {
        self.granules.insert(url.to_string(), granule);
        self
    }

    /// Fail the first fetch of a URL with an error.
    pub(crate) fn with_error(self, url: &str, error: FetchError) -> Self {
        self.errors.lock().unwrap().insert(url.to_string(), error);
        self
    }

    /// Panic whenever a URL is fetched.
    pub(crate) fn with_panic(mut self, url: &str) -> Self {
        self.panics.insert(url.to_string());
        self
    }

    /// Number of fetches performed.
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch_and_apply<T, F>(&self, url: &Url, callback: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Granule) -> T + Send + 'static,
    {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.panics.contains(url.as_str()) {
            panic!("fetcher panicked for {}", url);
        }
        if let Some(error) = self.errors.lock().unwrap().remove(url.as_str()) {
            return Err(error);
        }
        match self.granules.get(url.as_str()) {
            Some(granule) => Ok(callback(granule as &dyn Granule)),
            None => Err(FetchError::HttpStatus { status: 404 }),
        }
    }
}

/// A minimal HTTP/1.1 server on a random local port.
///
/// Serves the test granule as JSON at `/granule.json` and an HDF5 signature at
/// `/malformed.json`. `/oversized.json` declares a `Content-Length` far larger than its body
/// and then closes the connection. Any other path is a 404. If authentication is required, requests without
/// [TEST_AUTHORIZATION] receive a 401 challenge.
pub(crate) struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    pub(crate) async fn start(require_auth: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = handle_connection(stream, require_auth).await;
                });
            }
        });
        Self { addr }
    }

    /// URL of a path on this server.
    pub(crate) fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}/{}", self.addr, path)).unwrap()
    }
}

async fn handle_connection(mut stream: TcpStream, require_auth: bool) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }
    let request = String::from_utf8_lossy(&request).into_owned();
    let mut lines = request.split("\r\n");
    let path = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .unwrap_or("/")
        .to_string();
    let authorised = lines
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("authorization") && value.trim() == TEST_AUTHORIZATION
        });

    let (status, body) = if require_auth && !authorised {
        ("401 Unauthorized", Vec::new())
    } else {
        match path.as_str() {
            "/granule.json" => ("200 OK", serde_json::to_vec(&get_test_granule()).unwrap()),
            "/malformed.json" => ("200 OK", b"\x89HDF\r\n\x1a\n".to_vec()),
            "/oversized.json" => ("200 OK", b"{}".to_vec()),
            _ => ("404 Not Found", Vec::new()),
        }
    };
    let content_length = match path.as_str() {
        "/oversized.json" if !require_auth || authorised => i64::MAX as u64,
        _ => body.len() as u64,
    };
    let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status, content_length
    );
    if require_auth && !authorised {
        head.push_str("WWW-Authenticate: Basic realm=\"test\"\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}
