use anyhow::Context;
use clap::Parser;
use station::config::StationArgs;
use station::device_store::DeviceStore;
use station::engine::Station;
use station::mjpeg::MjpegHttpSource;
use station::server::{router, AppState};
use station_shared::{ControllerClient, InferenceClient, RemoteClient};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Waste sorting station: proximity-triggered detection and sorting"
)]
struct Args {
    #[command(flatten)]
    station: StationArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse().station;

    let store = match &args.config_dir {
        Some(dir) => DeviceStore::with_path(dir.clone()),
        None => DeviceStore::new().context("Cannot locate a home directory for devices.json")?,
    };
    let devices = store
        .load()
        .with_context(|| format!("Failed to load devices from {}", store.root_path().display()))?;
    info!(
        "Camera: {}, controller: {}",
        devices.camera.as_deref().unwrap_or("unset"),
        devices.controller.as_deref().unwrap_or("unset")
    );
    if args.inference_url.is_empty() {
        warn!("No --inference-url given; detection calls will fail until one is configured");
    }

    let remote = RemoteClient::new(args.mode.into(), &args.proxy_base, args.request_timeout())
        .with_device_address(devices.controller.clone());
    let controller = ControllerClient::new(remote.clone());
    let detector = InferenceClient::new(remote.clone(), args.inference_settings());
    let source = MjpegHttpSource::new(remote.http().clone(), args.request_timeout());

    let (station, handle) = Station::new(
        args.station_config(devices),
        controller.clone(),
        detector,
        source,
    );
    let engine = tokio::spawn(station.run());

    let app = router(AppState {
        handle: handle.clone(),
        store,
        controller,
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Operator API listening on http://{}", args.listen);

    // Stopping the engine closes the annotated streams so the server can
    // drain its connections
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {e}");
            }
            info!("Shutting down");
            handle.shutdown().await;
        })
        .await
        .context("Server error")?;

    engine.await.context("Station engine panicked")?;
    Ok(())
}
