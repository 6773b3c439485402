//! Core library for the `weather` app.
//!
//! This crate defines:
//! - Configuration handling
//! - The current-weather client and its domain model
//! - The single-entry local weather cache
//! - Connectivity and location abstractions over the host platform
//! - The location → fetch → cache flow and the presenter that renders its result
//!
//! It is used by `weather-cli`, but can also be embedded by any host that
//! implements the [`platform`] traits.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod flow;
pub mod location;
pub mod model;
pub mod platform;
pub mod presenter;
pub mod provider;

pub use cache::{FileStore, KeyValueStore, MemoryStore, WeatherCache};
pub use config::Config;
pub use flow::{FlowOutcome, FlowReport, Trigger, WeatherFlow};
pub use model::{Coordinates, WeatherResponse};
pub use presenter::{Presenter, WeatherView};
pub use provider::{FetchError, WeatherProvider};
