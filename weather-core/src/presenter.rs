//! Maps a weather response onto display fields.

use std::fmt::Display;

use chrono::{DateTime, TimeZone};
use tracing::{debug, warn};

use crate::{cache::WeatherCache, model::WeatherResponse};

/// Regions whose locale conventionally uses Fahrenheit.
const FAHRENHEIT_REGIONS: &[&str] = &["US", "LR", "MM"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconAsset {
    Sunny,
    Cloud,
    Rain,
    Storm,
    Snowflake,
}

impl IconAsset {
    pub fn as_str(&self) -> &'static str {
        match self {
            IconAsset::Sunny => "sunny",
            IconAsset::Cloud => "cloud",
            IconAsset::Rain => "rain",
            IconAsset::Storm => "storm",
            IconAsset::Snowflake => "snowflake",
        }
    }
}

impl std::fmt::Display for IconAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-match lookup of an API icon code.
pub fn icon_for_code(code: &str) -> Option<IconAsset> {
    let icon = match code {
        "01d" => IconAsset::Sunny,
        "02d" | "03d" | "04d" | "04n" | "01n" | "02n" | "03n" | "10n" => IconAsset::Cloud,
        "10d" | "11n" => IconAsset::Rain,
        "11d" => IconAsset::Storm,
        "13d" | "13n" => IconAsset::Snowflake,
        _ => return None,
    };
    Some(icon)
}

/// "°F" for US, LR and MM; "°C" everywhere else.
pub fn unit_suffix(region: &str) -> &'static str {
    if FAHRENHEIT_REGIONS.iter().any(|r| r.eq_ignore_ascii_case(region)) {
        "°F"
    } else {
        "°C"
    }
}

/// Region part of a POSIX or BCP-47 locale name: `en_US.UTF-8` and `en-US` give `US`.
pub fn region_from_locale(locale: &str) -> Option<String> {
    let tag = locale.split(['.', '@']).next()?;
    let region = tag.split(['_', '-']).nth(1)?;
    if region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(region.to_ascii_uppercase())
    } else {
        None
    }
}

/// First locale region found in `LC_ALL`, `LC_MESSAGES`, `LANG`.
pub fn region_from_env<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| lookup(var))
        .find_map(|value| region_from_locale(&value))
}

/// Unix seconds as `HH:mm` in `tz`.
pub fn format_unix_time<Tz>(secs: i64, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let utc = DateTime::from_timestamp(secs, 0)?;
    Some(utc.with_timezone(tz).format("%H:%M").to_string())
}

/// Display fields bound to the weather screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherView {
    pub condition: String,
    pub description: String,
    pub temperature: String,
    pub sunrise: String,
    pub sunset: String,
    pub max: String,
    pub min: String,
    pub wind_speed: String,
    pub name: String,
    pub country: String,
    pub humidity: String,
    pub icon: Option<IconAsset>,
}

impl WeatherView {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct Presenter<Tz: TimeZone> {
    region: String,
    tz: Tz,
}

impl<Tz> Presenter<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    pub fn new(region: impl Into<String>, tz: Tz) -> Self {
        Self {
            region: region.into(),
            tz,
        }
    }

    pub fn unit(&self) -> &'static str {
        unit_suffix(&self.region)
    }

    /// Bind `response` onto `view`. Entries are applied in order, so the last one wins.
    pub fn render(&self, response: &WeatherResponse, view: &mut WeatherView) {
        let unit = self.unit();

        for entry in &response.weather {
            view.condition = entry.main.clone();
            view.description = entry.description.clone();
            view.temperature = format!("{}{unit}", number(response.main.temp));
            view.sunrise = self.time(response.sys.sunrise);
            view.sunset = self.time(response.sys.sunset);
            view.max = format!("{}{unit} Max", number(response.main.temp_max));
            view.min = format!("{}{unit} Min", number(response.main.temp_min));
            view.wind_speed = number(response.wind.speed);
            view.name = response.name.clone();
            view.country = response.sys.country.clone();
            view.humidity = format!("{} %", response.main.humidity);

            match icon_for_code(&entry.icon) {
                Some(icon) => view.icon = Some(icon),
                None => debug!(code = %entry.icon, "No icon for code; keeping current one"),
            }
        }
    }

    /// Render whatever the cache holds. Returns `false` and leaves `view` alone when it is empty.
    pub fn render_cached(&self, cache: &WeatherCache, view: &mut WeatherView) -> bool {
        match cache.load() {
            Some(response) => {
                self.render(&response, view);
                true
            }
            None => {
                warn!("No cached weather data to display");
                false
            }
        }
    }

    fn time(&self, secs: i64) -> String {
        format_unix_time(secs, &self.tz).unwrap_or_default()
    }
}

/// Always shows a fractional part, so `12.0` renders as "12.0" rather than "12".
fn number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
