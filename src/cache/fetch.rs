//! HTTP fetching for the content cache
//!
//! Fetching is blocking: the cache store runs it on tokio's blocking pool
//! and streams the body straight to disk.

use crate::config::schema::DownloadConfig;
use crate::error::{UtahError, UtahResult};
use std::io::Read;
use tracing::debug;

/// Opens a response body for a URL
///
/// Implementations only return a reader for a `200` response; anything
/// else is an error.
pub trait Fetcher: Send + Sync {
    fn open(&self, url: &str) -> UtahResult<Box<dyn Read + Send>>;
}

/// Fetcher backed by a ureq agent
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(config.timeout())
            .http_status_as_error(false)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn open(&self, url: &str) -> UtahResult<Box<dyn Read + Send>> {
        debug!("GET {}", url);

        let response = self.agent.get(url).call().map_err(|e| UtahError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(UtahError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        Ok(Box::new(response.into_body().into_reader()))
    }
}
