use std::{io::IsTerminal, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, CustomType, Password, PasswordDisplayMode};
use weather_core::{
    Config, Coordinates, FetchError, FileStore, FlowOutcome, Presenter, Trigger, WeatherCache,
    WeatherFlow, WeatherView,
    config::PermissionDecision,
    connectivity::{NetworkStatus, SysfsNetworkStatus},
    platform::Platform,
    presenter::region_from_env,
    provider::shared_provider,
};

use crate::{
    platform::{AssumeOnline, CliLocation, ConsoleNotifier, PromptPermissions, SettingsHints},
    render::format_view,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Current weather for where you are")]
pub struct Cli {
    /// Log more (repeat for trace output). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure API key, location and permission interactively.
    Configure,

    /// Show cached weather, fetching it first if nothing is cached yet.
    Show(FetchArgs),

    /// Fetch fresh weather for the current location and show it.
    Refresh(FetchArgs),

    /// Forget the cached weather response.
    ClearCache,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Latitude to use instead of the configured location.
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude to use instead of the configured location.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Skip the network interface check.
    #[arg(long)]
    pub assume_online: bool,
}

impl FetchArgs {
    fn coordinates(&self) -> Result<Option<Coordinates>> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => {
                let at = Coordinates::new(lat, lon);
                anyhow::ensure!(at.is_valid(), "Coordinates out of range: {at}");
                Ok(Some(at))
            }
            _ => Ok(None),
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Show(args) => fetch_and_show(Trigger::Startup, &args).await,
            Command::Refresh(args) => fetch_and_show(Trigger::Refresh, &args).await,
            Command::ClearCache => {
                cache()?.clear().context("Failed to clear weather cache")?;
                println!("Weather cache cleared.");
                Ok(())
            }
        }
    }
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env_overrides(|k| std::env::var(k).ok());
    Ok(config)
}

fn cache() -> Result<WeatherCache> {
    let path = Config::cache_file_path()?;
    Ok(WeatherCache::new(Arc::new(FileStore::new(path))))
}

async fn fetch_and_show(trigger: Trigger, args: &FetchArgs) -> Result<()> {
    let config = load_config()?;
    let cache = cache()?;

    let override_at = args.coordinates()?;
    let fixed = override_at.or(config.location.map(Coordinates::from));

    let network: Arc<dyn NetworkStatus> = if args.assume_online {
        Arc::new(AssumeOnline)
    } else {
        Arc::new(SysfsNetworkStatus::default())
    };

    let permissions = PromptPermissions::new(
        permission_for(&config, override_at),
        true,
        std::io::stdin().is_terminal(),
    );

    let platform = Platform {
        location: Arc::new(CliLocation::new(fixed, config.ip_location)?),
        permissions: Arc::new(permissions),
        network,
        settings: Arc::new(SettingsHints),
        notifier: Arc::new(ConsoleNotifier),
    };

    // Without an API key only the fetch fails; cache and location gates still run.
    let provider = shared_provider(&config)?;
    let flow = WeatherFlow::new(
        provider,
        cache.clone(),
        platform,
        config.location_timeout(),
    );

    let report = flow.run(trigger).await;

    let region = config
        .region
        .clone()
        .or_else(|| region_from_env(|k| std::env::var(k).ok()))
        .unwrap_or_default();
    let presenter = Presenter::new(region, chrono::Local);

    let mut view = WeatherView::default();
    let rendered = if presenter.render_cached(&cache, &mut view) {
        true
    } else if let FlowOutcome::Updated(response) = &report.outcome {
        presenter.render(response, &mut view);
        true
    } else {
        false
    };

    if rendered {
        print!("{}", format_view(&view));
    } else if matches!(report.outcome, FlowOutcome::FetchFailed(_)) {
        println!("No weather data available yet.");
    }

    if report.outcome == FlowOutcome::FetchFailed(FetchError::MissingApiKey) {
        eprintln!("Hint: run `weather configure` or set WEATHER_API_KEY.");
    }

    Ok(())
}

/// Coordinates given on the command line count as consent for this run.
fn permission_for(
    config: &Config,
    override_at: Option<Coordinates>,
) -> Option<PermissionDecision> {
    match override_at {
        Some(_) => Some(PermissionDecision::Granted),
        None => config.location_permission,
    }
}

fn configure() -> Result<()> {
    let mut config = Config::load()?;

    let key = Password::new("OpenWeather API key (leave blank to keep current):")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    if !key.trim().is_empty() {
        config.api_key = Some(key.trim().to_string());
    }

    let fixed = Confirm::new("Set a fixed location?")
        .with_default(config.location.is_none())
        .prompt()?;
    if fixed {
        let latitude = CustomType::<f64>::new("Latitude:")
            .with_validator(|v: &f64| {
                Ok(if (-90.0..=90.0).contains(v) {
                    inquire::validator::Validation::Valid
                } else {
                    inquire::validator::Validation::Invalid("must be between -90 and 90".into())
                })
            })
            .prompt()?;
        let longitude = CustomType::<f64>::new("Longitude:")
            .with_validator(|v: &f64| {
                Ok(if (-180.0..=180.0).contains(v) {
                    inquire::validator::Validation::Valid
                } else {
                    inquire::validator::Validation::Invalid("must be between -180 and 180".into())
                })
            })
            .prompt()?;
        config.set_location(Coordinates::new(latitude, longitude));
    }

    config.ip_location = Confirm::new("Fall back to IP-based location?")
        .with_default(config.ip_location)
        .prompt()?;

    let allow = Confirm::new("Allow weather to use your location?")
        .with_default(true)
        .prompt()?;
    config.location_permission = Some(if allow {
        PermissionDecision::Granted
    } else {
        PermissionDecision::Denied
    });

    config.save()?;
    let saved_to = Config::config_file_path()?;
    println!("Configuration saved to {}", saved_to.display());
    Ok(())
}
