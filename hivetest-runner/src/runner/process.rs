// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkerCommand;
use crate::{
    errors::WorkerExitError,
    framing::{Frame, FrameDecoder},
    worker::WorkerRequest,
};
use hivetest_metadata::ResultRecord;
use std::{io, process::Stdio};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc::UnboundedSender,
};
use tracing::{debug, warn};

/// Events sent from worker tasks to the orchestrator loop.
#[derive(Debug)]
pub(super) enum WorkerEvent {
    Progress { slot: usize, text: String },
    Finished {
        slot: usize,
        record: ResultRecord,
        worker_failed: bool,
    },
}

/// Runs one worker process to completion and returns its record.
///
/// Progress frames are forwarded as they are decoded. The child is killed if this future is
/// dropped before it finishes.
pub(super) async fn run_worker(
    command: &WorkerCommand,
    slot: usize,
    request: &WorkerRequest,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<ResultRecord, WorkerExitError> {
    let payload = serde_json::to_vec(request).map_err(WorkerExitError::SerializeRequest)?;

    let mut child = command
        .to_command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| WorkerExitError::Spawn {
            program: command.program().display().to_string(),
            error,
        })?;
    debug!(slot, pid = ?child.id(), files = request.files.len(), "spawned worker");

    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(&payload).await {
            Ok(()) => {}
            // The worker died before reading its assignment. Its exit status says why.
            Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                debug!(slot, "worker closed stdin early");
            }
            Err(error) => return Err(WorkerExitError::Io(error)),
        }
        // stdin is dropped here, so the worker sees the end of its input.
    }

    let Some(mut stdout) = child.stdout.take() else {
        return Err(WorkerExitError::Io(io::Error::other(
            "worker stdout was not captured",
        )));
    };

    let mut decoder = FrameDecoder::new();
    let mut record = None;
    loop {
        let read = stdout
            .read_buf(decoder.buffer_mut())
            .await
            .map_err(WorkerExitError::Io)?;
        while let Some(frame) = decoder.decode()? {
            match frame {
                Frame::Progress(text) => {
                    _ = events.send(WorkerEvent::Progress { slot, text });
                }
                Frame::Record(received) => {
                    if record.replace(received).is_some() {
                        warn!(slot, "worker sent more than one record, keeping the last");
                    }
                }
            }
        }
        if read == 0 {
            break;
        }
    }
    decoder.finish()?;

    let status = child.wait().await.map_err(WorkerExitError::Io)?;
    match record {
        Some(record) => {
            if !status.success() {
                warn!(slot, %status, "worker exited unsuccessfully after reporting results");
            }
            Ok(record)
        }
        None => Err(WorkerExitError::NoRecord { status }),
    }
}
