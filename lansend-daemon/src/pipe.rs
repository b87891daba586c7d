//! Host-UI pipe transport.
//!
//! Two dedicated OS threads own the pipe I/O: one reads newline-delimited
//! `{type, data}` operation frames from the host, one drains notification
//! frames back. On POSIX the pipe names are FIFO paths; on Windows they
//! are `\\.\pipe\...` names, which open through the same file API.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use lansend_protocol::{decode_frame, encode_frame, Notification, Operation};

use crate::event_bus::EventBus;

/// Spawn the reader and writer threads. They run for the process
/// lifetime; a closed host pipe is treated as an exit request.
pub fn spawn_pipe_threads(stdin_pipe: PathBuf, stdout_pipe: PathBuf, bus: Arc<EventBus>) {
    let reader_bus = bus.clone();
    std::thread::Builder::new()
        .name("pipe-reader".into())
        .spawn(move || run_reader(stdin_pipe, reader_bus))
        .expect("failed to spawn pipe reader thread");

    std::thread::Builder::new()
        .name("pipe-writer".into())
        .spawn(move || run_writer(stdout_pipe, bus))
        .expect("failed to spawn pipe writer thread");
}

fn run_reader(path: PathBuf, bus: Arc<EventBus>) {
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            error!("cannot open stdin pipe {:?}: {}", path, e);
            bus.post_operation(Operation::ExitApp);
            return;
        }
    };

    info!("host pipe connected: {:?}", path);
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("pipe read error: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match decode_frame::<Operation>(trimmed) {
            Ok(operation) => bus.post_operation(operation),
            Err(e) => {
                warn!("dropping malformed operation frame: {}", e);
                bus.post_notification(Notification::error(format!(
                    "unrecognized operation: {}",
                    e
                )));
            }
        }
    }

    info!("host pipe closed, requesting shutdown");
    bus.post_operation(Operation::ExitApp);
}

fn run_writer(path: PathBuf, bus: Arc<EventBus>) {
    let mut file = match std::fs::OpenOptions::new().write(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            error!("cannot open stdout pipe {:?}: {}", path, e);
            return;
        }
    };

    loop {
        let mut wrote = false;
        while let Some(notification) = bus.poll_notification() {
            match encode_frame(&notification) {
                Ok(frame) => {
                    if let Err(e) = file.write_all(frame.as_bytes()) {
                        warn!("pipe write error, stopping writer: {}", e);
                        return;
                    }
                    wrote = true;
                }
                Err(e) => warn!("failed to encode notification: {}", e),
            }
        }
        if wrote {
            if let Err(e) = file.flush() {
                warn!("pipe flush error, stopping writer: {}", e);
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
