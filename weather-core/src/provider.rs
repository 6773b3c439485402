use crate::{Config, Coordinates, WeatherResponse, provider::openweather::OpenWeatherClient};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};
use thiserror::Error;

pub mod openweather;

/// Unit system passed to the API as the `units` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Units {
    #[default]
    Metric,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
        }
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Units {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            _ => Err(anyhow::anyhow!(
                "Unknown unit system '{value}'. Supported units: metric."
            )),
        }
    }
}

/// Why a weather fetch failed. None of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("weather API answered with HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed weather payload: {0}")]
    Decode(String),

    #[error("no API key configured; run `weather configure` or set WEATHER_API_KEY")]
    MissingApiKey,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn fetch_weather(&self, at: Coordinates) -> Result<WeatherResponse, FetchError>;
}

/// Stands in for the client until an API key is configured; every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingApiKey;

#[async_trait]
impl WeatherProvider for MissingApiKey {
    async fn fetch_weather(&self, _at: Coordinates) -> Result<WeatherResponse, FetchError> {
        Err(FetchError::MissingApiKey)
    }
}

/// Construct the weather client from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured.\n\
             Hint: run `weather configure` or set WEATHER_API_KEY."
        )
    })?;

    let client = OpenWeatherClient::builder(api_key.to_owned())
        .base_url(config.base_url())
        .units(config.units()?)
        .timeout(config.request_timeout())
        .build()?;

    Ok(Box::new(client))
}

/// Like [`provider_from_config`], but a missing API key only fails the fetch itself,
/// so cached data and the location gates still work.
pub fn shared_provider(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    if config.api_key().is_none() {
        return Ok(Arc::new(MissingApiKey));
    }

    Ok(Arc::from(provider_from_config(config)?))
}
