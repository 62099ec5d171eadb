// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;
use std::num::NonZero;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use crate::{BlockBuffer, BufferConfig, Validation};

/// A configuration with tiny blocks, so that a handful of bytes already spans several blocks.
pub(crate) fn tiny_config(min: usize, max: usize) -> BufferConfig {
    BufferConfig::new()
        .with_block_sizes(
            NonZero::new(min).expect("test block sizes are nonzero"),
            NonZero::new(max).expect("test block sizes are nonzero"),
        )
        .with_validation(Validation::Off)
}

pub(crate) fn tiny_buffer(min: usize, max: usize) -> BlockBuffer {
    BlockBuffer::with_config(tiny_config(min, max)).expect("test configurations are valid")
}

/// The `(offset, limit, capacity)` of every active block.
pub(crate) fn layout(buffer: &BlockBuffer) -> Vec<(usize, usize, usize)> {
    buffer
        .active
        .iter()
        .map(|handle| {
            let block = buffer.block(*handle);
            (block.offset, block.limit, block.capacity())
        })
        .collect()
}

/// Captures formatted log output for inspection by a test.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().expect("log capture lock poisoned")).to_string()
    }

    pub(crate) fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// A subscriber writing into this capture. Use with `tracing::subscriber::set_default()`.
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[derive(Debug)]
pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().expect("log capture lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
