//! Orchestrator: one capture session after another until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::capture::{run_capture, CaptureReport};
use crate::collaborators::{Collaborators, FrameDecoder};
use crate::config::DaemonConfig;
use crate::control_file::ControlFile;
use crate::session::{LifecycleManager, Session, SessionState};
use crate::sync::{run_control_sync, ControlSync};
use crate::traits::{CameraBackend, CameraError, Result};
use crate::watch::FileWatch;

const CAPTURE_THREAD: &str = "capture";
const CONTROL_THREAD: &str = "control";

/// Reports a session thread as finished when dropped, including on unwind.
struct Completion {
    name: &'static str,
    tx: Sender<&'static str>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        // The orchestrator may already have given up on this thread.
        self.tx.send(self.name).ok();
    }
}

/// Session threads and the channel they report completion on.
struct Workers<S> {
    capture: JoinHandle<(S, Box<dyn FrameDecoder>, CaptureReport)>,
    control: JoinHandle<ControlSync>,
    done: Receiver<&'static str>,
    finished: Vec<&'static str>,
}

impl<S> Workers<S> {
    fn note(&mut self, name: &'static str) {
        debug!(thread = name, "session thread finished");
        self.finished.push(name);
    }

    /// Wait at most `timeout` for `name` to report completion.
    fn await_completion(&mut self, name: &'static str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.finished.contains(&name) {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(left) {
                Ok(finished) => self.note(finished),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    error!(thread = name, ?timeout, "session thread did not stop");
                    return Err(CameraError::Wedged(name));
                }
            }
        }
        Ok(())
    }
}

/// The capture daemon.
pub struct Daemon<B: CameraBackend> {
    manager: LifecycleManager<B>,
    decoder: Box<dyn FrameDecoder>,
    sync: ControlSync,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    join_timeout: Duration,
}

impl<B: CameraBackend> Daemon<B> {
    /// Daemon for the device and control file named in `config`.
    pub fn new(backend: B, config: DaemonConfig, collaborators: Collaborators) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let watch = match FileWatch::new(&config.control_file) {
            Ok(watch) => Some(watch),
            Err(err) => {
                warn!(%err, "control file edits will not be picked up");
                None
            }
        };

        let Collaborators {
            decoder,
            display,
            cec,
        } = collaborators;
        let sync = ControlSync::new(
            ControlFile::new(&config.control_file, config.max_control_file_size),
            watch,
            display,
            cec,
            config.flush_threshold,
        );

        Self {
            poll_interval: config.poll_interval,
            join_timeout: config.join_timeout,
            manager: LifecycleManager::new(backend, config, Arc::clone(&shutdown)),
            decoder,
            sync,
            shutdown,
        }
    }

    /// Flag that stops the daemon when set.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Current device lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.manager.state()
    }

    /// Run sessions until shutdown.
    ///
    /// Returns an error only when a session thread could not be stopped or
    /// died; its resources cannot be released safely and the process should
    /// exit.
    pub fn run(self) -> Result<()> {
        let Self {
            mut manager,
            mut decoder,
            mut sync,
            shutdown,
            poll_interval,
            join_timeout,
        } = self;

        info!(device = %manager.config().device_path.display(), "daemon started");
        while let Some(session) = manager.acquire() {
            let Session {
                device,
                mut stream,
                format,
                flags,
            } = session;

            if let Err(err) = decoder.start(&format) {
                warn!(%err, "decoder did not start");
            }

            let (tx, done) = mpsc::channel();

            let capture = {
                let flags = flags.clone();
                let completion = Completion {
                    name: CAPTURE_THREAD,
                    tx: tx.clone(),
                };
                let device = Arc::clone(&device);
                let mut decoder = decoder;
                thread::Builder::new()
                    .name(CAPTURE_THREAD.to_owned())
                    .spawn(move || {
                        let _completion = completion;
                        let report = run_capture(&mut stream, decoder.as_mut(), &flags);
                        drop(device);
                        (stream, decoder, report)
                    })?
            };

            let control = {
                let flags = flags.clone();
                let completion = Completion {
                    name: CONTROL_THREAD,
                    tx,
                };
                let device = Arc::clone(&device);
                let mut sync = sync;
                thread::Builder::new()
                    .name(CONTROL_THREAD.to_owned())
                    .spawn(move || {
                        let _completion = completion;
                        run_control_sync(&mut sync, device.as_ref(), &flags, poll_interval);
                        sync
                    })
            };
            let control = match control {
                Ok(control) => control,
                Err(err) => {
                    error!(%err, "could not start the control thread");
                    flags.halt();
                    capture.join().ok();
                    return Err(err.into());
                }
            };

            let mut workers = Workers {
                capture,
                control,
                done,
                finished: Vec::new(),
            };

            // Monitor: a session ends on shutdown or when either thread stops.
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    flags.halt();
                }
                if !flags.any_running() {
                    break;
                }
                match workers.done.recv_timeout(poll_interval) {
                    Ok(name) => {
                        workers.note(name);
                        flags.halt();
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("stopping session");

            workers.await_completion(CAPTURE_THREAD, join_timeout)?;
            workers.await_completion(CONTROL_THREAD, join_timeout)?;

            let (returned_stream, returned_decoder, report) = workers
                .capture
                .join()
                .map_err(|_| CameraError::Panicked(CAPTURE_THREAD))?;
            sync = workers
                .control
                .join()
                .map_err(|_| CameraError::Panicked(CONTROL_THREAD))?;
            decoder = returned_decoder;
            decoder.finish();

            manager.teardown(returned_stream, device);
            info!(
                frames = report.frames,
                bytes = report.bytes,
                "session ended"
            );
        }

        info!("daemon stopped");
        Ok(())
    }
}
