//! Destinations for streamed command output.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::sandbox::LineCallback;

/// A chunk of raw output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    /// True when the chunk came from stderr.
    pub is_error: bool,
}

/// Receives output from sandboxed commands as it is produced.
pub trait OutputSink: Send + Sync {
    fn write(&self, data: &[u8], is_error: bool);
}

/// Forwards chunks over an unbounded channel to an observer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn write(&self, data: &[u8], is_error: bool) {
        // A dropped receiver means nobody is watching; output is still
        // collected by the run itself.
        let _ = self.tx.send(OutputChunk {
            data: data.to_vec(),
            is_error,
        });
    }
}

/// Collects chunks in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    chunks: Mutex<Vec<OutputChunk>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<OutputChunk> {
        self.chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// All stdout and stderr bytes, lossily decoded.
    pub fn text(&self) -> String {
        self.chunks()
            .iter()
            .map(|c| String::from_utf8_lossy(&c.data).into_owned())
            .collect()
    }
}

impl OutputSink for BufferSink {
    fn write(&self, data: &[u8], is_error: bool) {
        self.chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(OutputChunk {
                data: data.to_vec(),
                is_error,
            });
    }
}

/// Adapt a sink to the executor's per-line callback.
pub fn line_callback(sink: Arc<dyn OutputSink>) -> LineCallback {
    Arc::new(move |line: &str, is_error: bool| {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        sink.write(&data, is_error);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_chunks() {
        let (sink, mut rx) = ChannelSink::new();
        sink.write(b"hello", false);
        sink.write(b"oops", true);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.data, b"hello");
        assert!(!first.is_error);
        assert!(rx.recv().await.unwrap().is_error);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.write(b"ignored", false);
    }

    #[test]
    fn test_line_callback_appends_newline() {
        let buffer = Arc::new(BufferSink::new());
        let cb = line_callback(buffer.clone());
        cb("line one", false);
        cb("line two", true);

        assert_eq!(buffer.text(), "line one\nline two\n");
        let chunks = buffer.chunks();
        assert!(!chunks[0].is_error);
        assert!(chunks[1].is_error);
    }
}
