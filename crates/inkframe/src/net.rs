//! Connectivity probe against a generate-204 endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, error};

/// Captive-portal style check endpoint: answers 204 with an empty body.
pub const DEFAULT_CHECK_URL: &str = "http://clients3.google.com/generate_204";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks callers until the network can reach the check endpoint.
pub struct ConnectivityProbe {
    http: reqwest::Client,
    check_url: String,
    poll_interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(http: reqwest::Client, check_url: String, poll_interval: Duration) -> Self {
        Self {
            http,
            check_url,
            poll_interval,
        }
    }

    /// One probe round trip. Anything but a 204 counts as offline, so a
    /// captive portal serving a login page does not pass.
    pub async fn is_online(&self) -> bool {
        match self
            .http
            .get(&self.check_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                let online = response.status() == StatusCode::NO_CONTENT;
                if !online {
                    debug!("connectivity check returned {}", response.status());
                }
                online
            }
            Err(e) => {
                debug!("connectivity check failed: {}", e);
                false
            }
        }
    }

    /// Poll until the endpoint answers 204. Never gives up: the frame has
    /// nothing useful to do before the network is up.
    pub async fn wait_until_online(&self) {
        loop {
            if self.is_online().await {
                return;
            }
            error!(
                "no internet connectivity, retrying in {}s",
                self.poll_interval.as_secs_f32()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
