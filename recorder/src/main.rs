mod recorder;
mod snapshot;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use recorder::RecordingStateMachine;
use thermal_motion::{MotionDetector, MotionFilter, NoveltyDetector};
use thermal_recorder_common::config::Config;
use thermal_recorder_common::frame::{Resolution, TimestampedFrame};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to bind frame socket {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("failed to accept sensor connection: {0}")]
    Accept(std::io::Error),
    #[error("failed to read frame: {0}")]
    Read(std::io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let resolution = config.sensor.resolution();
    info!(
        socket = %config.sensor.socket.display(),
        rows = resolution.rows,
        cols = resolution.cols,
        fps = config.sensor.fps,
        frame_compare_gap = config.motion.frame_compare_gap,
        one_diff_only = config.motion.one_diff_only,
        trigger_threshold = config.throttle.trigger_threshold,
        output_dir = %config.recorder.output_dir.display(),
        "starting thermal recorder"
    );

    let detector = MotionDetector::new(&config.motion, resolution);
    let novelty = NoveltyDetector::new(&config.throttle, resolution);
    let mut state_machine = RecordingStateMachine::new(
        detector,
        novelty,
        &config.recorder,
        config.sensor.fps,
        resolution,
    );

    if let Err(e) = run(&config, &mut state_machine).await {
        error!(error = %e, "recorder stopped");
        std::process::exit(1);
    }
}

async fn run<F: MotionFilter>(
    config: &Config,
    state_machine: &mut RecordingStateMachine<F>,
) -> Result<(), RecorderError> {
    let socket = &config.sensor.socket;
    // A socket left behind by a previous run would make bind fail.
    if socket.exists() {
        let _ = std::fs::remove_file(socket);
    }
    let listener = UnixListener::bind(socket)
        .map_err(|e| RecorderError::Bind(socket.display().to_string(), e))?;
    info!(socket = %socket.display(), "waiting for sensor connection");

    let snapshot_requested = Arc::new(AtomicBool::new(false));
    let mut usr1 = signal(SignalKind::user_defined1()).map_err(RecorderError::Signal)?;
    let flag = Arc::clone(&snapshot_requested);
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            flag.store(true, Ordering::Relaxed);
        }
    });

    let resolution = config.sensor.resolution();
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => accepted.map_err(RecorderError::Accept)?.0,
            _ = tokio::signal::ctrl_c() => break,
        };
        info!("sensor connected");

        let shutdown = tokio::select! {
            result = serve_connection(stream, state_machine, resolution, &snapshot_requested) => {
                if let Err(e) = result {
                    warn!(error = %e, "sensor connection failed");
                }
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        state_machine.finish();
        if shutdown {
            break;
        }
        info!("waiting for sensor to reconnect");
    }

    info!("shutting down");
    state_machine.finish();
    let _ = std::fs::remove_file(socket);
    Ok(())
}

/// Read frames until the sensor disconnects or sends something undecodable.
async fn serve_connection<F: MotionFilter>(
    stream: UnixStream,
    state_machine: &mut RecordingStateMachine<F>,
    resolution: Resolution,
    snapshot_requested: &AtomicBool,
) -> Result<(), RecorderError> {
    let mut reader = BufReader::new(stream);
    let mut buf = vec![0u8; TimestampedFrame::encoded_len(resolution)];
    let mut total: u64 = 0;

    loop {
        match reader.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!(total, recording = state_machine.is_recording(), "sensor disconnected");
                return Ok(());
            }
            Err(e) => return Err(RecorderError::Read(e)),
        }

        let frame = match TimestampedFrame::deserialize(&buf, resolution) {
            Ok(f) => f,
            Err(e) => {
                // The stream has no resync marker, so drop the connection.
                warn!(error = %e, "failed to decode frame, closing connection");
                return Ok(());
            }
        };

        total += 1;
        if total % 1000 == 0 {
            debug!(total, "frames processed");
        }

        state_machine.process_frame(&frame);
        if snapshot_requested.swap(false, Ordering::Relaxed) {
            state_machine.take_snapshot();
        }
    }
}
