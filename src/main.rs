use sensor_link::companion::CompanionController;
use sensor_link::config::Config;
use sensor_link::local_link::LinkHub;
use sensor_link::receiver::{FileReceiver, HandheldService};
use sensor_link::recorder::{RecorderSettings, SensorRecorder};
use sensor_link::sensors::SimulatedSensors;
use sensor_link::session::{ServiceExit, SessionController, WearableService};
use std::sync::Arc;
use std::time::Duration;

const WATCH_NODE_ID: &str = "watch-0";
const PHONE_NODE_ID: &str = "phone-0";

/// How long to wait for the artifact after the stop was sent
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    };

    let hub = LinkHub::new();

    // Wearable: listener service hosting the session controller
    let (watch, watch_inbox) = hub.join(WATCH_NODE_ID, "Simulated Watch", &[config.capability.as_str()]);
    let recorder = SensorRecorder::new(
        Arc::new(SimulatedSensors::full()),
        RecorderSettings {
            sampling_period: config.sampling_period(),
            flush_threshold: config.flush_threshold,
        },
    );
    let controller = SessionController::new(recorder, Arc::new(watch));
    let wearable = tokio::spawn(WearableService::new(controller).run(watch_inbox));

    // Handheld: file receiver plus the companion controller
    let (phone, phone_inbox) = hub.join(PHONE_NODE_ID, "Phone", &[]);
    let (handheld, mut received) = HandheldService::new(FileReceiver::new(config.downloads_dir()));
    tokio::spawn(handheld.run(phone_inbox));

    let phone = Arc::new(phone);
    let mut companion = CompanionController::new(phone.clone(), phone, config.capability.clone());

    companion.discover_peers().await;
    log::info!("{}", companion.status());
    if !companion.can_start() {
        return;
    }

    companion.send_start().await;
    log::info!("{}", companion.status());

    tokio::time::sleep(Duration::from_secs(config.demo_duration_secs)).await;

    companion.send_stop().await;
    log::info!("{}", companion.status());

    match tokio::time::timeout(RECEIVE_TIMEOUT, received.recv()).await {
        Ok(Some(artifact)) => {
            log::info!(
                "Recording saved to {} ({} bytes from {})",
                artifact.path.display(),
                artifact.bytes,
                artifact.source_peer
            );
        }
        Ok(None) => log::error!("Handheld listener stopped before a recording arrived"),
        Err(_) => log::error!("No recording received within {:?}", RECEIVE_TIMEOUT),
    }

    // Tear down the wearable side
    hub.leave(WATCH_NODE_ID);
    match wearable.await {
        Ok(ServiceExit::InboxClosed { pending_transfer: Some(transfer) }) => {
            let _ = transfer.await;
        }
        Ok(exit) => log::debug!("Wearable service ended: {:?}", exit),
        Err(e) => log::error!("Wearable service panicked: {}", e),
    }
}
