//! Polite HTTP fetching for local research candidates.
//!
//! Every fetch honors robots.txt (cached per domain with a TTL) and a
//! per-domain politeness interval. Transient failures get one retry with
//! a short jittered backoff; definitive answers like 404 do not.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use texting_robots::{get_robots_url, Robot};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

const USER_AGENT: &str = "Captionator/1.0";
const ROBOTS_TTL: Duration = Duration::from_secs(3600);
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Why a single content fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("blocked by robots.txt")]
    RobotsDisallowed,
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Transient failures are worth one more attempt; a 4xx is an answer.
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Other(_) => true,
            FetchError::Status(status) => *status >= 500,
            FetchError::RobotsDisallowed => false,
        }
    }
}

/// Web-content fetch capability consumed by the research aggregator.
#[async_trait]
pub trait FetchContent: Send + Sync {
    /// Fetch a URL and return its HTML body.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

struct RobotsEntry {
    robot: Robot,
    crawl_delay: Option<Duration>,
    cached_at: Instant,
}

/// Robots-aware, rate-limited fetcher for chamber and government sites.
pub struct ResearchFetcher {
    client: reqwest::Client,
    robots: Mutex<HashMap<String, RobotsEntry>>,
    last_request: Mutex<HashMap<String, Instant>>,
    min_interval: Duration,
}

impl ResearchFetcher {
    /// Build a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            robots: Mutex::new(HashMap::new()),
            last_request: Mutex::new(HashMap::new()),
            min_interval: MIN_REQUEST_INTERVAL,
        }
    }

    fn host_of(url: &str) -> Result<String, FetchError> {
        Url::parse(url)
            .map_err(|e| FetchError::Other(format!("Failed to parse URL '{}': {}", url, e)))?
            .host_str()
            .map(|host| host.to_string())
            .ok_or_else(|| FetchError::Other(format!("No host in URL: {}", url)))
    }

    /// Check robots.txt for the URL's domain, fetching and caching it on miss.
    ///
    /// A missing or unreadable robots.txt counts as permissive, matching
    /// the convention that absence means no restrictions.
    async fn check_robots(&self, url: &str) -> Result<(bool, Option<Duration>), FetchError> {
        let domain = Self::host_of(url)?;

        {
            let robots = self.robots.lock().unwrap();
            if let Some(entry) = robots.get(&domain) {
                if entry.cached_at.elapsed() < ROBOTS_TTL {
                    return Ok((entry.robot.allowed(url), entry.crawl_delay));
                }
            }
        }

        let robots_url = get_robots_url(url)
            .map_err(|e| FetchError::Other(format!("Failed to derive robots.txt URL: {}", e)))?;

        info!("Fetching robots.txt for domain: {}", domain);
        let body = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                response.bytes().await.unwrap_or_default().to_vec()
            }
            Ok(response) => {
                info!(
                    "robots.txt returned {} for {}, treating as permissive",
                    response.status(),
                    domain
                );
                Vec::new()
            }
            Err(e) => {
                warn!(
                    "robots.txt fetch failed for {}: {}, treating as permissive",
                    domain, e
                );
                Vec::new()
            }
        };

        let robot = Robot::new(USER_AGENT, &body)
            .map_err(|e| FetchError::Other(format!("Failed to parse robots.txt: {}", e)))?;
        let crawl_delay = robot.delay.map(Duration::from_secs_f32);
        let allowed = robot.allowed(url);

        let mut robots = self.robots.lock().unwrap();
        robots.insert(
            domain,
            RobotsEntry {
                robot,
                crawl_delay,
                cached_at: Instant::now(),
            },
        );

        Ok((allowed, crawl_delay))
    }

    /// Wait until the politeness interval for the URL's domain has passed.
    /// A robots.txt crawl-delay longer than the default interval wins.
    async fn wait_for_domain(&self, url: &str, crawl_delay: Option<Duration>) {
        let Ok(domain) = Self::host_of(url) else {
            return;
        };

        let effective_interval = match crawl_delay {
            Some(delay) if delay > self.min_interval => delay,
            _ => self.min_interval,
        };

        let sleep_duration = {
            let map = self.last_request.lock().unwrap();
            map.get(&domain).and_then(|last| {
                let elapsed = last.elapsed();
                (elapsed < effective_interval).then(|| effective_interval - elapsed)
            })
        };

        if let Some(duration) = sleep_duration {
            tokio::time::sleep(duration).await;
        }

        let mut map = self.last_request.lock().unwrap();
        map.insert(domain, Instant::now());
    }

    async fn attempt_fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Other(format!("Request to '{}' failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Other(format!("Failed to read body from '{}': {}", url, e)))
    }
}

/// Short random backoff before the single retry.
fn retry_jitter() -> Duration {
    Duration::from_millis(50 + (rand::random::<u64>() % 200))
}

#[async_trait]
impl FetchContent for ResearchFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let (allowed, crawl_delay) = self.check_robots(url).await?;
        if !allowed {
            warn!("URL blocked by robots.txt: {}", url);
            return Err(FetchError::RobotsDisallowed);
        }

        self.wait_for_domain(url, crawl_delay).await;

        info!("Fetching research candidate: {}", url);
        match self.attempt_fetch(url).await {
            Ok(html) => Ok(html),
            Err(err) if err.is_transient() => {
                warn!("Fetch of '{}' failed ({}), retrying once", url, err);
                tokio::time::sleep(retry_jitter()).await;
                self.wait_for_domain(url, crawl_delay).await;
                self.attempt_fetch(url).await
            }
            Err(err) => Err(err),
        }
    }
}
