//! Location service abstraction and the one-shot fix request.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Coordinates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Satellite or other device-local positioning.
    Gps,
    /// Position derived from the network.
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    HighAccuracy,
    Balanced,
    LowPower,
}

/// Parameters handed to the platform location service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRequest {
    pub priority: Priority,
    pub interval: Duration,
    pub min_update_interval: Duration,
    pub max_update_delay: Duration,
    pub wait_for_accurate_location: bool,
    pub max_updates: u32,
}

impl LocationRequest {
    /// High accuracy, exactly one update.
    pub fn one_shot() -> Self {
        Self {
            priority: Priority::HighAccuracy,
            interval: Duration::from_millis(1000),
            min_update_interval: Duration::from_millis(500),
            max_update_delay: Duration::from_millis(1000),
            wait_for_accurate_location: true,
            max_updates: 1,
        }
    }
}

/// A single resolved location reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub coordinates: Coordinates,
    pub accuracy_m: Option<f64>,
    /// How old the reading was when delivered.
    pub age: Option<Duration>,
    pub source: ProviderKind,
}

impl Fix {
    pub fn new(coordinates: Coordinates, source: ProviderKind) -> Self {
        Self {
            coordinates,
            accuracy_m: None,
            age: None,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("no location provider is enabled")]
    Disabled,

    #[error("location service failed: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LocationService: Send + Sync + Debug {
    fn is_provider_enabled(&self, kind: ProviderKind) -> bool;

    /// Deliver exactly one fix for `request`, then stop.
    async fn request_fix(&self, request: &LocationRequest) -> Result<Fix, LocationError>;
}

/// Location is usable when either the GPS or the network provider is on.
pub fn is_location_enabled(service: &dyn LocationService) -> bool {
    service.is_provider_enabled(ProviderKind::Gps)
        || service.is_provider_enabled(ProviderKind::Network)
}
