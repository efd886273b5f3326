// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker side of a multi-process run.
//!
//! A worker reads one [`WorkerRequest`] as JSON from stdin, runs the requested files, and
//! writes [frames](crate::framing) to stdout. Test bodies must not write to stdout while
//! running in a worker; stderr is passed through untouched.

use crate::{
    errors::WorkerError,
    framing::Frame,
    reporter::{ProgressReporter, TestOutcome},
    scheduler::{RunOptions, run_tree},
    tree::Registry,
};
use bytes::BytesMut;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use tracing::debug;

/// The argument that puts a hivetest binary into worker mode.
pub const WORKER_ARG: &str = "__worker";

/// The assignment sent to a worker.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerRequest {
    /// The files to run, in order.
    pub files: Vec<Utf8PathBuf>,

    /// How to run them.
    pub options: RunOptions,
}

/// Writes each progress character as its own frame.
#[derive(Debug)]
pub struct FramedProgress<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: Write> FramedProgress<W> {
    /// Creates a new `FramedProgress`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::new(),
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.buf.clear();
        frame.encode(&mut self.buf).map_err(io::Error::other)?;
        self.writer.write_all(&self.buf)?;
        self.writer.flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressReporter for FramedProgress<W> {
    fn test_finished(&mut self, outcome: TestOutcome) -> io::Result<()> {
        self.write_frame(&Frame::Progress(outcome.progress_char().to_string()))
    }
}

/// Serves one request: reads it from `input`, runs it, and writes frames to `output`.
pub fn serve(registry: &Registry, mut input: impl Read, output: impl Write) -> Result<(), WorkerError> {
    let mut request = String::new();
    input
        .read_to_string(&mut request)
        .map_err(WorkerError::ReadRequest)?;
    let request: WorkerRequest =
        serde_json::from_str(&request).map_err(WorkerError::ParseRequest)?;
    debug!(files = request.files.len(), "worker received assignment");

    let tree = registry.load(&request.files, &request.options)?;
    let mut progress = FramedProgress::new(output);
    let record = run_tree(tree, &request.options, &mut progress).map_err(WorkerError::Run)?;

    progress.buf.clear();
    Frame::Record(record)
        .encode(&mut progress.buf)
        .map_err(WorkerError::SerializeRecord)?;
    progress
        .writer
        .write_all(&progress.buf)
        .and_then(|()| progress.writer.flush())
        .map_err(WorkerError::Write)
}

/// Serves one request over the process's stdin and stdout.
pub fn serve_stdio(registry: &Registry) -> Result<(), WorkerError> {
    serve(registry, io::stdin().lock(), io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        framing::FrameDecoder,
        tree::{Body, SuiteBuilder, TestFailure},
    };
    use pretty_assertions::assert_eq;

    fn suite(s: &mut SuiteBuilder<'_>) {
        s.it("passes", Body::sync(|_| Ok(())));
        s.it("fails", Body::sync(|_| Err(TestFailure::msg("boom"))));
    }

    #[test]
    fn serve_writes_progress_then_record() {
        let mut registry = Registry::new();
        registry.register("suite.rs", suite);
        let request = WorkerRequest {
            files: vec!["suite.rs".into()],
            options: RunOptions::default(),
        };
        let input = serde_json::to_vec(&request).unwrap();

        let mut output = Vec::new();
        serve(&registry, input.as_slice(), &mut output).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&output);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
        decoder.finish().unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Progress(".".to_owned()));
        assert_eq!(frames[1], Frame::Progress("F".to_owned()));
        let Frame::Record(record) = &frames[2] else {
            panic!("expected a record frame, found {:?}", frames[2]);
        };
        assert_eq!((record.passed, record.failed), (1, 1));
        assert!(record.times.contains_key(camino::Utf8Path::new("suite.rs")));
    }

    #[test]
    fn serve_rejects_malformed_requests() {
        let err = serve(&Registry::new(), &b"not json"[..], Vec::new()).unwrap_err();
        assert!(matches!(err, WorkerError::ParseRequest(_)), "{err:?}");
    }
}
