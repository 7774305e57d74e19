//! camview daemon binary.

use std::sync::atomic::Ordering;

use camview::{Collaborators, Daemon, DaemonConfig, FrameStats, V4L2Backend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camview=info")),
        )
        .init();

    if let Err(err) = run() {
        error!(%err, "camview exiting");
        std::process::exit(1);
    }
}

fn run() -> camview::traits::Result<()> {
    let config = DaemonConfig::default();
    let backend = V4L2Backend::new(config.dequeue_timeout);
    let daemon = Daemon::new(
        backend,
        config,
        Collaborators::new(Box::new(FrameStats::default())),
    );

    let shutdown = daemon.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|err| camview::CameraError::Io(std::io::Error::other(err)))?;

    daemon.run()
}
