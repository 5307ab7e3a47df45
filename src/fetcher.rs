//! Fetching remote granules into memory.
//!
//! A granule is streamed into an in-memory buffer, parsed into a [Granule] and handed to a
//! callback on a blocking worker thread. The buffer never touches the filesystem, and it is
//! dropped as soon as the callback returns.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{redirect, Response, StatusCode};
use tracing::{debug, error};
use url::Url;

use crate::error::{error_chain, ConfigError, FetchError};
use crate::granule::{Granule, GranuleParser};
use crate::metrics::{BYTES_FETCHED, FETCH_DURATION};
use crate::resource_manager::ResourceManager;

/// Default host whose authentication challenges are answered with credentials.
pub const DEFAULT_AUTH_HOST: &str = "urs.earthdata.nasa.gov";

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 10;

/// Upper bound on the buffer capacity reserved up front from `Content-Length`.
const MAX_INITIAL_CAPACITY: usize = 64 * 1024 * 1024;

/// Fetcher trait.
///
/// Defines the interface for fetching a remote granule and applying a function to it.
pub trait Fetcher: Send + Sync {
    /// Fetch the granule at `url` into memory, parse it and apply `callback` to it.
    ///
    /// Returns the callback's result, or the reason the granule could not be fetched or parsed.
    /// Failures are returned rather than raised, so one bad granule does not affect others.
    ///
    /// # Arguments
    ///
    /// * `url`: URL of the granule
    /// * `callback`: Function applied to the parsed granule
    fn fetch_and_apply<T, F>(
        &self,
        url: &Url,
        callback: F,
    ) -> impl Future<Output = Result<T, FetchError>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&dyn Granule) -> T + Send + 'static;
}

/// Basic authentication credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Returns credentials if both a username and a password are present.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) => Some(Self { username, password }),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP(S) granule fetcher.
///
/// Implements [Fetcher] for HTTP. Authentication challenges from the auth host are answered with
/// Basic credentials; the session cookie it sets is reused by subsequent requests.
pub struct HttpFetcher {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    auth_host: String,
    parser: Arc<dyn GranuleParser>,
    resource_manager: Arc<ResourceManager>,
    use_rayon: bool,
}

impl HttpFetcher {
    /// Returns a new HttpFetcher without credentials.
    ///
    /// # Arguments
    ///
    /// * `parser`: Parser for downloaded granules
    /// * `resource_manager`: Bounds concurrent connections and buffered memory
    /// * `request_timeout`: Optional timeout for each request, including the body
    pub fn new(
        parser: Arc<dyn GranuleParser>,
        resource_manager: Arc<ResourceManager>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS));
        let builder = match request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        Ok(Self {
            client: builder.build()?,
            credentials: None,
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            parser,
            resource_manager,
            use_rayon: false,
        })
    }

    /// Set the credentials used to answer authentication challenges.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the host whose authentication challenges are answered.
    pub fn with_auth_host(mut self, auth_host: &str) -> Self {
        self.auth_host = auth_host.to_string();
        self
    }

    /// Parse granules on the rayon thread pool rather than tokio's blocking pool.
    pub fn with_rayon(mut self, use_rayon: bool) -> Self {
        self.use_rayon = use_rayon;
        self
    }

    /// Send a GET request, answering an authentication challenge from the auth host.
    async fn send(&self, url: &Url) -> Result<Response, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        // Redirects have been followed, so this is the URL that issued the challenge.
        let challenge_url = response.url().clone();
        let host = challenge_url.host_str().unwrap_or_default();
        if host != self.auth_host {
            return Err(FetchError::Auth {
                reason: format!("unexpected authentication challenge from {}", host),
            });
        }
        let credentials = self.credentials.as_ref().ok_or_else(|| FetchError::Auth {
            reason: "no credentials configured".to_string(),
        })?;
        debug!(host, "Answering authentication challenge");
        let response = self
            .client
            .get(challenge_url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::Auth {
                reason: "credentials rejected".to_string(),
            }),
            _ => Ok(response),
        }
    }

    /// Download a granule into memory, then parse it and apply the callback.
    async fn download_and_apply<T, F>(&self, url: &Url, callback: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Granule) -> T + Send + 'static,
    {
        let start = Instant::now();
        // Acquire connection permit to be freed via drop when the body has been read
        let conn_permit = self.resource_manager.connection().await?;
        let mut response = self.send(url).await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
            });
        }
        let content_length: Option<usize> =
            response.content_length().map(usize::try_from).transpose()?;
        // Memory permits are held until the buffer has been dropped.
        let mut mem_permit = match content_length {
            Some(content_length) => self.resource_manager.memory(content_length).await?,
            None => None,
        };
        // Content-Length is untrusted, so the buffer grows fallibly as the body arrives.
        let mut buf =
            Vec::with_capacity(content_length.map_or(0, |len| len.min(MAX_INITIAL_CAPACITY)));
        while let Some(bytes) = response.chunk().await? {
            buf.try_reserve(bytes.len())
                .map_err(|_| FetchError::Allocation {
                    requested: buf.len().saturating_add(bytes.len()),
                })?;
            buf.extend_from_slice(&bytes);
        }
        drop(conn_permit);
        if content_length.is_none() {
            mem_permit = self.resource_manager.memory(buf.len()).await?;
        }
        FETCH_DURATION.observe(start.elapsed().as_secs_f64());
        BYTES_FETCHED.inc_by(buf.len() as u64);
        debug!(bytes = buf.len(), "Downloaded granule");

        let parser = self.parser.clone();
        let apply = move || -> Result<T, FetchError> {
            let granule = parser.parse(&buf)?;
            Ok(callback(granule.as_ref()))
        };
        let result = if self.use_rayon {
            tokio_rayon::spawn(apply).await
        } else {
            tokio::task::spawn_blocking(apply).await?
        };
        drop(mem_permit);
        result
    }
}

impl Fetcher for HttpFetcher {
    #[tracing::instrument(level = "DEBUG", skip(self, url, callback), fields(url = %url))]
    async fn fetch_and_apply<T, F>(&self, url: &Url, callback: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Granule) -> T + Send + 'static,
    {
        let result = self.download_and_apply(url, callback).await;
        if let Err(err) = &result {
            error!(
                url = %url,
                kind = %err.kind(),
                caused_by = ?error_chain(err),
                "Failed to fetch granule"
            );
        }
        result
    }
}
