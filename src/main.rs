//! CLI entry point for fleet_sync.
//!
//! Provides subcommands for listing a filtered page of live vehicles, browsing
//! the route and destination options, and watching the fleet over time with
//! optional CSV capture.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fleet_sync::{
    config::Config,
    dashboard::{Dashboard, FleetView, ViewState},
    filter::FilterOption,
    format::format_coordinate,
    output::{append_records, print_json, print_pretty},
    paginator::PAGE_SIZE_CHOICES,
};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_sync")]
#[command(about = "Live transit fleet positions, filtered by route and destination", long_about = None)]
struct Cli {
    /// Transit API base URL
    #[arg(long, env = "TRANSIT_API_URL", global = true)]
    api_url: Option<String>,

    /// Transit API key, sent as the x-api-key header
    #[arg(long, env = "TRANSIT_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Route ids to keep (repeat or comma-separate)
    #[arg(short, long, value_delimiter = ',')]
    route: Vec<String>,

    /// Destination headsigns to keep
    #[arg(short, long)]
    destination: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one page of live vehicles
    Vehicles {
        #[command(flatten)]
        filters: FilterArgs,

        /// Page to show (clamped to the available pages)
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Vehicles per page: 10, 20, 50 or 100
        #[arg(long, default_value_t = 10, value_parser = parse_page_size)]
        per_page: usize,

        /// Resolve each vehicle's position to a place name
        #[arg(long, default_value_t = false)]
        geocode: bool,

        /// Print the page as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List route filter options
    Routes {
        /// Number of 20-route pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// List destination filter options for the given routes
    Destinations {
        /// Route ids (repeat or comma-separate)
        #[arg(short, long, value_delimiter = ',', required = true)]
        route: Vec<String>,

        /// Number of trip pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Poll the fleet on the freshness window
    Watch {
        #[command(flatten)]
        filters: FilterArgs,

        /// CSV file to append each filtered snapshot to
        #[arg(short, long)]
        output: Option<String>,

        /// Number of samples to collect (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        samples: usize,
    },
}

fn parse_page_size(raw: &str) -> Result<usize, String> {
    let size: usize = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if PAGE_SIZE_CHOICES.contains(&size) {
        Ok(size)
    } else {
        Err(format!("page size must be one of {PAGE_SIZE_CHOICES:?}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fleet_sync.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_sync.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key;
    }
    debug!(api_url = %config.api_url, vehicle_limit = config.vehicle_limit, "Configuration loaded");

    let dashboard = Dashboard::build(&config)?;

    match cli.command {
        Commands::Vehicles {
            filters,
            page,
            per_page,
            geocode,
            json,
        } => {
            apply_filters(&dashboard, &filters);
            dashboard.set_items_per_page(per_page);
            if let Err(e) = dashboard.refresh().await {
                debug!(error = %e, "Initial vehicle fetch failed");
            }
            dashboard.go_to_page(page);

            match dashboard.view() {
                ViewState::Loaded(view) => show_page(&dashboard, &view, geocode, json).await?,
                ViewState::Empty { filtered: true, total } => {
                    info!(total, "No vehicles match the selected route or destination filters");
                }
                ViewState::Empty { filtered: false, .. } => {
                    info!("No vehicle data is currently available");
                }
                ViewState::Error {
                    message,
                    detail,
                    retryable,
                } => {
                    if retryable {
                        warn!("Vehicle fetch failed, running the command again may succeed");
                    }
                    anyhow::bail!("{message} ({detail})")
                }
                ViewState::Loading => warn!("Vehicle snapshot still loading"),
            }
        }
        Commands::Routes { pages } => {
            let routes = dashboard.routes();
            for _ in 0..pages {
                routes.load_more().await?;
                if !routes.has_more() {
                    break;
                }
            }
            let options = dashboard.route_options();
            info!(count = options.len(), has_more = routes.has_more(), "Routes loaded");
            print_options(&options);
        }
        Commands::Destinations { route, pages } => {
            let trips = dashboard.trips();
            trips.select_now(route).await?;
            for _ in 1..pages {
                if !trips.has_more() {
                    break;
                }
                trips.load_more().await?;
            }
            let options = dashboard.destination_options();
            info!(
                routes = %trips.routes(),
                trips = trips.trips().len(),
                destinations = options.len(),
                "Destinations loaded"
            );
            print_options(&options);
        }
        Commands::Watch {
            filters,
            output,
            samples,
        } => {
            apply_filters(&dashboard, &filters);
            watch(&dashboard, &config, output.as_deref(), samples).await?;
        }
    }

    Ok(())
}

fn apply_filters(dashboard: &Dashboard, filters: &FilterArgs) {
    if !filters.route.is_empty() {
        dashboard.select_routes(filters.route.iter().cloned());
    }
    if !filters.destination.is_empty() {
        dashboard.select_destinations(filters.destination.iter().cloned());
    }
}

fn print_options(options: &[FilterOption]) {
    for option in options {
        info!(
            id = %option.id,
            label = %option.label,
            subtitle = option.subtitle.as_deref().unwrap_or(""),
            "Option"
        );
    }
}

/// Prints a loaded page, resolving place names first when asked.
async fn show_page(dashboard: &Dashboard, view: &FleetView, geocode: bool, json: bool) -> Result<()> {
    info!(
        page = view.page,
        total_pages = view.total_pages,
        matched = view.matched,
        total = view.total,
        "Fleet page"
    );

    if json {
        print_json(&view.vehicles)?;
    } else {
        print_pretty(&view.vehicles, Utc::now());
    }

    if geocode {
        let cache = dashboard.geocode();
        for vehicle in &view.vehicles {
            let (Some(lat), Some(lon)) = (vehicle.latitude, vehicle.longitude) else {
                continue;
            };
            let status = cache.resolve(lat, lon).await;
            let place = status.address.unwrap_or_else(|| {
                format!("{}, {}", format_coordinate(Some(lat)), format_coordinate(Some(lon)))
            });
            info!(id = %vehicle.id, failures = status.failure_count, place = %place, "Location");
        }
    }
    Ok(())
}

/// Polls until `samples` snapshots were taken (0 = until Ctrl+C). Stops early
/// on an error that retrying cannot fix.
#[tracing::instrument(skip(dashboard, config))]
async fn watch(
    dashboard: &Dashboard,
    config: &Config,
    output: Option<&str>,
    samples: usize,
) -> Result<()> {
    if samples == 0 {
        info!(interval_secs = config.freshness.as_secs(), "Watching. Press Ctrl+C to stop.");
    }

    let mut taken = 0;
    loop {
        taken += 1;
        match dashboard.refresh().await {
            Ok(()) => {
                let vehicles = dashboard.filtered_vehicles();
                info!(sample = taken, vehicles = vehicles.len(), "Fleet sampled");
                if let Some(path) = output {
                    append_records(path, Utc::now(), &vehicles)?;
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(sample = taken, error = %e, hint = e.user_message(), "Fleet sample failed")
            }
            Err(e) => {
                let hint = e.user_message();
                return Err(anyhow::Error::new(e).context(hint));
            }
        }
        dashboard.geocode().purge_expired();
        if let Err(e) = dashboard.trips().refresh_if_stale().await {
            warn!(error = %e, "Trip reload failed");
        }

        if samples > 0 && taken >= samples {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.freshness) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!(samples = taken, "Finished watching");
    Ok(())
}
