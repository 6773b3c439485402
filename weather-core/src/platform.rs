//! Platform collaborators the fetch flow talks to besides location and network.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;

use crate::{connectivity::NetworkStatus, location::LocationService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    FineLocation,
    CoarseLocation,
}

pub const LOCATION_PERMISSIONS: &[Permission] =
    &[Permission::FineLocation, Permission::CoarseLocation];

/// Answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionReport {
    pub all_granted: bool,
    /// At least one permission was refused with "don't ask again".
    pub permanently_denied: bool,
    /// The platform wants an explanation shown before asking again.
    pub rationale_required: bool,
    /// Nobody could be asked, so there is no answer at all.
    pub unanswered: bool,
}

impl PermissionReport {
    pub fn granted() -> Self {
        Self {
            all_granted: true,
            ..Self::default()
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }

    pub fn permanently_denied() -> Self {
        Self {
            permanently_denied: true,
            ..Self::default()
        }
    }

    pub fn needs_rationale() -> Self {
        Self {
            rationale_required: true,
            ..Self::default()
        }
    }

    pub fn unanswered() -> Self {
        Self {
            unanswered: true,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait PermissionGate: Send + Sync + Debug {
    async fn request(&self, permissions: &[Permission]) -> PermissionReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsPage {
    /// System location toggle.
    Location,
    /// This application's permission page.
    AppPermissions,
}

pub trait SettingsLauncher: Send + Sync + Debug {
    fn open(&self, page: SettingsPage);
}

/// Messages surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    LocationDisabled,
    PermissionRationale,
    PermissionDenied,
    /// The permission could not be asked for, e.g. without a terminal.
    PermissionUnanswered,
    NoConnectivity,
    LocationTimedOut,
    /// The location service answered with an error instead of a fix.
    LocationUnavailable,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Notice::LocationDisabled => "Your location is turned off. Please turn it on.",
            Notice::PermissionRationale => {
                "It looks like you have turned off permissions required for this feature. \
                 It can be enabled under application settings."
            }
            Notice::PermissionDenied => {
                "You have denied location permission. Please allow it, it is mandatory."
            }
            Notice::PermissionUnanswered => {
                "Location permission has not been granted yet. \
                 It can be granted under application settings."
            }
            Notice::NoConnectivity => "You are not connected to the internet.",
            Notice::LocationTimedOut => "Could not determine your location. Please try again.",
            Notice::LocationUnavailable => {
                "Your location is currently unavailable. Please try again later."
            }
        };
        f.write_str(msg)
    }
}

pub trait Notifier: Send + Sync + Debug {
    fn notify(&self, notice: Notice);

    /// Shown while a location fix or weather request is outstanding.
    fn progress(&self, _active: bool) {}
}

/// Everything the flow needs from the host.
#[derive(Debug, Clone)]
pub struct Platform {
    pub location: Arc<dyn LocationService>,
    pub permissions: Arc<dyn PermissionGate>,
    pub network: Arc<dyn NetworkStatus>,
    pub settings: Arc<dyn SettingsLauncher>,
    pub notifier: Arc<dyn Notifier>,
}
