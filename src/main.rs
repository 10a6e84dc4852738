// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use quickscan::app::{Intent, ScanSettings, UserSession};
use quickscan::backends::camera::file_source::FileBackend;
use quickscan::backends::camera::{CameraBackend, default_backend};
use quickscan::catalog::HttpCatalogClient;
use quickscan::scan::QrDecoder;
use quickscan::{ScanCoordinator, config, constants, terminal};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

mod cli;

#[derive(Parser)]
#[command(name = "quickscan")]
#[command(about = "Scan a book's code, borrow or return it")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive scan screen
    Scan {
        /// Scan purpose: borrow or return
        #[arg(short, long, default_value = "borrow", value_parser = parse_intent)]
        intent: Intent,

        /// Signed-in user id
        #[arg(long)]
        user_id: Option<u32>,

        /// Signed-in username (for display only)
        #[arg(long)]
        username: Option<String>,

        /// Camera device path (e.g. /dev/video0)
        #[arg(short, long)]
        camera: Option<String>,

        /// Scan a still image instead of a camera
        #[arg(long)]
        input: Option<PathBuf>,

        /// Catalog service base URL
        #[arg(long)]
        api: Option<String>,
    },

    /// List available cameras
    List,

    /// Decode a barcode from an image file
    Decode {
        /// Image file to decode
        image: PathBuf,
    },
}

fn parse_intent(s: &str) -> Result<Intent, String> {
    Intent::from_str(s)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=quickscan=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List) => cli::list_cameras(),
        Some(Commands::Decode { image }) => cli::decode_image(image),
        Some(Commands::Scan {
            intent,
            user_id,
            username,
            camera,
            input,
            api,
        }) => run_scan(intent, user_id, username, camera, input, api),
        None => run_scan(Intent::Borrow, None, None, None, None, None),
    }
}

/// Wire the backend, catalog client, and coordinator together and hand
/// them to the terminal screen
fn run_scan(
    intent: Intent,
    user_id: Option<u32>,
    username: Option<String>,
    camera: Option<String>,
    input: Option<PathBuf>,
    api: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load().unwrap_or_default();

    let api_base_url = api.unwrap_or_else(|| cfg.api_base_url.clone());
    let user = match (user_id.or(cfg.user_id), username.or_else(|| cfg.username.clone())) {
        (Some(user_id), username) => Some(UserSession {
            user_id,
            username: username.unwrap_or_default(),
        }),
        (None, _) => None,
    };

    let backend: Arc<dyn CameraBackend> = match input {
        Some(path) => Arc::new(FileBackend::new(path)),
        None => default_backend(),
    };

    let settings = ScanSettings {
        sample_rate_hz: constants::scan::clamp_sample_rate(cfg.sample_rate_hz),
        preferred_camera: camera.or_else(|| cfg.last_camera_path.clone()),
        ..ScanSettings::default()
    };

    let rt = tokio::runtime::Runtime::new()?;

    let catalog = Arc::new(HttpCatalogClient::new(api_base_url.clone()));
    // Constructed inside the runtime: the coordinator spawns its event
    // pump on creation.
    let (coordinator, events) = rt.block_on(async {
        ScanCoordinator::new(
            backend,
            catalog,
            Arc::new(QrDecoder::new()),
            user,
            intent,
            settings,
        )
    });

    terminal::run(
        coordinator,
        events,
        rt.handle().clone(),
        cfg.mirror_preview,
        &api_base_url,
    )
}
