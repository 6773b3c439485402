use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, error, info, instrument};

use crate::model::{Coordinates, WeatherResponse};

use super::{FetchError, Units, WeatherProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the OpenWeather current-weather endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    endpoint: Url,
    api_key: String,
    units: Units,
    http: Client,
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClientBuilder {
    api_key: String,
    base_url: String,
    units: Units,
    timeout: Duration,
}

impl OpenWeatherClientBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<OpenWeatherClient> {
        let endpoint = format!("{}/2.5/weather", self.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("Invalid weather API base URL: {}", self.base_url))?;

        let http = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(OpenWeatherClient {
            endpoint,
            api_key: self.api_key,
            units: self.units,
            http,
        })
    }
}

impl OpenWeatherClient {
    pub fn builder(api_key: String) -> OpenWeatherClientBuilder {
        OpenWeatherClientBuilder {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            units: Units::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `{base}/2.5/weather?lat=..&lon=..&units=..&appid=..`
    pub fn request_url(&self, at: Coordinates) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lat", &at.latitude.to_string())
            .append_pair("lon", &at.longitude.to_string())
            .append_pair("units", self.units.as_str())
            .append_pair("appid", &self.api_key);
        url
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    #[instrument(skip(self), fields(lat = at.latitude, lon = at.longitude))]
    async fn fetch_weather(&self, at: Coordinates) -> Result<WeatherResponse, FetchError> {
        let res = self
            .http
            .get(self.request_url(at))
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "Weather request did not complete");
                FetchError::from(err)
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|err| {
            error!(error = %err, "Failed to read weather response body");
            FetchError::from(err)
        })?;

        if !status.is_success() {
            log_http_failure(status, &body);
            return Err(FetchError::Http(status.as_u16()));
        }

        let parsed: WeatherResponse = serde_json::from_str(&body).map_err(|err| {
            error!(
                error = %err,
                body = %truncate_body(&body),
                "Weather payload did not match schema"
            );
            FetchError::Decode(err.to_string())
        })?;

        debug!(?parsed, "Weather response");
        info!(location = %parsed.name, temp = parsed.main.temp, "Fetched current weather");

        Ok(parsed)
    }
}

fn log_http_failure(status: StatusCode, body: &str) {
    let body = truncate_body(body);
    match status {
        StatusCode::BAD_REQUEST => {
            error!(status = 400, %body, "Weather API rejected the request (bad request)")
        }
        StatusCode::NOT_FOUND => {
            error!(status = 404, %body, "Weather API endpoint or location not found")
        }
        other => error!(status = other.as_u16(), %body, "Weather API request failed"),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
