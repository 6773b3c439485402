//! Terminal implementations of the platform collaborators.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use weather_core::{
    Config, Coordinates,
    config::PermissionDecision,
    connectivity::{NetworkStatus, Transport},
    location::{Fix, LocationError, LocationRequest, LocationService, ProviderKind},
    platform::{
        Notice, Notifier, Permission, PermissionGate, PermissionReport, SettingsLauncher,
        SettingsPage,
    },
};

const IP_LOCATION_URL: &str = "http://ip-api.com/json/?fields=status,message,lat,lon";

/// Configured coordinates act as the GPS provider; IP geolocation as the network provider.
#[derive(Debug)]
pub struct CliLocation {
    fixed: Option<Coordinates>,
    ip_lookup: Option<IpLocator>,
}

impl CliLocation {
    pub fn new(fixed: Option<Coordinates>, ip_lookup: bool) -> anyhow::Result<Self> {
        let ip_lookup = if ip_lookup {
            Some(IpLocator::new(IP_LOCATION_URL)?)
        } else {
            None
        };
        Ok(Self { fixed, ip_lookup })
    }
}

#[async_trait]
impl LocationService for CliLocation {
    fn is_provider_enabled(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Gps => self.fixed.is_some(),
            ProviderKind::Network => self.ip_lookup.is_some(),
        }
    }

    async fn request_fix(&self, request: &LocationRequest) -> Result<Fix, LocationError> {
        debug!(?request, "Location requested");

        if let Some(at) = self.fixed {
            return Ok(Fix {
                accuracy_m: Some(0.0),
                ..Fix::new(at, ProviderKind::Gps)
            });
        }

        match &self.ip_lookup {
            Some(locator) => locator.locate().await,
            None => Err(LocationError::Disabled),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IpLocator {
    url: String,
    http: Client,
}

impl IpLocator {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    async fn locate(&self) -> Result<Fix, LocationError> {
        let unavailable = |e: reqwest::Error| LocationError::Unavailable(e.to_string());

        let parsed: IpApiResponse = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        match (parsed.status.as_str(), parsed.lat, parsed.lon) {
            ("success", Some(lat), Some(lon)) => {
                let at = Coordinates::new(lat, lon);
                Ok(Fix {
                    age: Some(Duration::ZERO),
                    ..Fix::new(at, ProviderKind::Network)
                })
            }
            _ => Err(LocationError::Unavailable(
                parsed.message.unwrap_or_else(|| "IP geolocation failed".to_string()),
            )),
        }
    }
}

/// Remembered decision first, otherwise an interactive yes/no.
///
/// The first refusal asks for a rationale; the second is remembered as permanent.
/// Without a terminal nobody is asked and the request stays unanswered.
#[derive(Debug)]
pub struct PromptPermissions {
    stored: Option<PermissionDecision>,
    persist: bool,
    interactive: bool,
    refusals: AtomicU32,
}

impl PromptPermissions {
    pub fn new(stored: Option<PermissionDecision>, persist: bool, interactive: bool) -> Self {
        Self {
            stored,
            persist,
            interactive,
            refusals: AtomicU32::new(0),
        }
    }

    fn remember(&self, decision: PermissionDecision) {
        if !self.persist {
            return;
        }
        let saved = Config::load().and_then(|mut cfg| {
            cfg.location_permission = Some(decision);
            cfg.save()
        });
        if let Err(err) = saved {
            warn!(error = %err, "Failed to remember location permission");
        }
    }

    fn answer(&self, allowed: bool) -> PermissionReport {
        if allowed {
            self.remember(PermissionDecision::Granted);
            return PermissionReport::granted();
        }

        if self.refusals.fetch_add(1, Ordering::SeqCst) == 0 {
            PermissionReport::needs_rationale()
        } else {
            self.remember(PermissionDecision::Denied);
            PermissionReport::permanently_denied()
        }
    }
}

#[async_trait]
impl PermissionGate for PromptPermissions {
    async fn request(&self, permissions: &[Permission]) -> PermissionReport {
        match self.stored {
            Some(PermissionDecision::Granted) => return PermissionReport::granted(),
            Some(PermissionDecision::Denied) => return PermissionReport::permanently_denied(),
            None => {}
        }

        if !self.interactive {
            info!(?permissions, "No terminal to ask for location permission");
            return PermissionReport::unanswered();
        }

        let asked = tokio::task::spawn_blocking(|| {
            inquire::Confirm::new("Allow weather to use your location?")
                .with_default(true)
                .prompt()
        })
        .await;

        match asked {
            Ok(Ok(allowed)) => self.answer(allowed),
            Ok(Err(err)) => {
                warn!(error = %err, "Permission prompt aborted");
                PermissionReport::denied()
            }
            Err(err) => {
                warn!(error = %err, "Permission prompt task failed");
                PermissionReport::denied()
            }
        }
    }
}

/// Reports a wired link without inspecting anything.
#[derive(Debug)]
pub struct AssumeOnline;

impl NetworkStatus for AssumeOnline {
    fn active_transports(&self) -> Option<Vec<Transport>> {
        Some(vec![Transport::Ethernet])
    }
}

/// There is no settings app; point at the command that changes the setting instead.
#[derive(Debug)]
pub struct SettingsHints;

impl SettingsLauncher for SettingsHints {
    fn open(&self, page: SettingsPage) {
        let hint = match page {
            SettingsPage::Location => {
                "Hint: set a location with `weather configure`, pass --lat/--lon, \
                 or enable ip_location."
            }
            SettingsPage::AppPermissions => {
                "Hint: grant location permission with `weather configure`, \
                 or pass --lat/--lon for a single run."
            }
        };
        eprintln!("{hint}");
    }
}

#[derive(Debug)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        eprintln!("{notice}");
    }

    fn progress(&self, active: bool) {
        if active {
            eprintln!("Fetching current weather...");
        }
    }
}
