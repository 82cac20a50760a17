//! HTTP client for the map generation service

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::MapServiceConfig;

use super::{GameMap, MapError, MapResponse, MapSource};

/// First retry delay, doubled after every failed attempt
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Map generator reached over HTTP
#[derive(Clone)]
pub struct HttpMapSource {
    client: Client,
    generate_url: String,
    retries: u32,
}

impl HttpMapSource {
    pub fn new(config: &MapServiceConfig) -> Result<Self, MapError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MapError::Request)?;

        Ok(Self {
            client,
            generate_url: format!(
                "{}/generate?width={}&height={}&fillPercentage={}",
                config.base_url.trim_end_matches('/'),
                config.width,
                config.height,
                config.fill_percent
            ),
            retries: config.retries,
        })
    }

    /// Single request without retries
    async fn request_map(&self) -> Result<GameMap, MapError> {
        let response = self
            .client
            .get(&self.generate_url)
            .send()
            .await
            .map_err(MapError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MapError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: MapResponse = response.json().await.map_err(MapError::Parse)?;
        GameMap::from_response(payload)
    }

    async fn fetch_with_retry(&self) -> Result<GameMap, MapError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;

        loop {
            match self.request_map().await {
                Ok(map) => {
                    debug!(
                        attempt,
                        walls = map.walls.len(),
                        spawn_points = map.spawn_points.len(),
                        "Fetched map"
                    );
                    return Ok(map);
                }
                Err(e) if attempt < self.retries => {
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Map fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl MapSource for HttpMapSource {
    fn fetch(&self) -> BoxFuture<'_, Result<GameMap, MapError>> {
        Box::pin(self.fetch_with_retry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> MapServiceConfig {
        MapServiceConfig {
            base_url: base_url.to_string(),
            width: 75,
            height: 60,
            fill_percent: 42,
            retries: 1,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn builds_generate_url() {
        let source = HttpMapSource::new(&config("http://map:3000/")).unwrap();
        assert_eq!(
            source.generate_url,
            "http://map:3000/generate?width=75&height=60&fillPercentage=42"
        );
    }

    #[tokio::test]
    async fn unreachable_service_fails_after_retries() {
        // Port 9 on localhost is the discard service and is essentially never listening.
        let source = HttpMapSource::new(&config("http://127.0.0.1:9")).unwrap();
        let result = source.fetch().await;
        tokio_test::assert_err!(result);
    }
}
