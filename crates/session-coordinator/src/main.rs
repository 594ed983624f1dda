//! Session Simulator
//!
//! Drives one scripted session through the coordinator against the
//! in-process simulated transport:
//!
//! 1. Load configuration from environment (`SC_*`, `SC_SIM_*`)
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the `SessionCoordinator`
//! 4. Join, publish, print the session snapshot
//! 5. Leave (or tear down on Ctrl-C) and print rendered metrics

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use common::types::PeerId;
use session_coordinator::actors::{PublishOutcome, SessionCoordinator, UserNotice};
use session_coordinator::config::{Config, SimulationConfig};
use session_coordinator::observability::init_metrics_recorder;
use session_coordinator::transport::simulated::{SimulatedDevices, SimulatedTransport};
use session_coordinator::transport::ClientRole;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let sim = SimulationConfig::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter.clone().into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        app_id = %config.app_id,
        default_role = %config.default_role,
        room = %sim.room,
        latency_ms = sim.latency_ms,
        camera = sim.camera,
        microphone = sim.microphone,
        remote_peers = sim.remote_peers.len(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let transport = SimulatedTransport::new(
        Duration::from_millis(sim.latency_ms),
        sim.remote_peers.iter().copied().map(PeerId).collect(),
    );
    let devices = Arc::new(SimulatedDevices {
        camera: sim.camera,
        microphone: sim.microphone,
    });

    let cancel_token = CancellationToken::new();
    let (coordinator, coordinator_task) =
        SessionCoordinator::spawn(&config, transport, devices, cancel_token.clone());

    let mut notices = coordinator.notices();
    tokio::spawn(async move {
        while let Ok(UserNotice::CaptureUnavailable { message }) = notices.recv().await {
            warn!(message = %message, "User notice");
        }
    });

    let script = async {
        let Some(session) = coordinator
            .join(
                sim.room.as_str(),
                None,
                sim.local_uid,
                Some(ClientRole::Host),
            )
            .await?
        else {
            warn!(room = %sim.room, "Join did not complete");
            return Ok::<_, Box<dyn std::error::Error>>(());
        };

        let outcome = coordinator
            .publish(
                Some(session),
                Some(Box::new(|| warn!("No capture device available"))),
            )
            .await?;
        if let PublishOutcome::Published(kind) = outcome {
            info!(session_id = %session, kind = kind.as_str(), "Publishing");
        } else {
            warn!(session_id = %session, outcome = ?outcome, "Not publishing");
        }

        // Let remote peer announcements arrive
        tokio::time::sleep(Duration::from_millis(sim.latency_ms)).await;
        println!("{}", serde_json::to_string_pretty(&coordinator.snapshot())?);

        let teardown = coordinator.leave(Some(session)).await?;
        info!(session_id = %session, outcome = ?teardown, "Session finished");
        Ok::<_, Box<dyn std::error::Error>>(())
    };

    tokio::select! {
        result = script => {
            if let Err(e) = result {
                error!(error = %e, "Simulation failed");
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl-C, tearing down session");
        }
    }

    cancel_token.cancel();
    if let Err(e) = coordinator_task.await {
        error!(error = %e, "Coordinator task failed");
    }

    println!("{}", prometheus_handle.render());
    info!("Session simulator stopped");
    Ok(())
}
