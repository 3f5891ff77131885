//! Broker client boundary
//!
//! The processor only needs `poll(timeout)` and `close()`. Delivery
//! semantics, offset commits and partition assignment stay with the broker
//! client implementation.

use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

/// A single raw message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub payload: Vec<u8>,
    /// Position in the source stream, for log correlation
    pub offset: u64,
}

/// A connected broker client
#[async_trait]
pub trait BrokerClient: Send {
    /// Wait up to `timeout` for the next message; `None` means nothing arrived
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Release the connection; further polls fail with `BrokerError::Closed`
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Builds a broker client when the processor starts
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerClient>, BrokerError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

type ChannelItem = Result<Vec<u8>, String>;

/// In-process broker backed by a tokio channel
pub struct ChannelBroker {
    receiver: Option<mpsc::Receiver<ChannelItem>>,
    offset: u64,
}

/// Producer half of a [`ChannelBroker`]
#[derive(Clone)]
pub struct ChannelSender {
    sender: mpsc::Sender<ChannelItem>,
}

/// Hands out the receiving half exactly once
pub struct ChannelConnector {
    receiver: Mutex<Option<mpsc::Receiver<ChannelItem>>>,
}

impl ChannelBroker {
    /// Create a connected sender/connector pair
    pub fn pair(capacity: usize) -> (ChannelSender, ChannelConnector) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (ChannelSender { sender }, ChannelConnector { receiver: Mutex::new(Some(receiver)) })
    }
}

impl ChannelSender {
    /// Publish a raw message
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), BrokerError> {
        self.sender.send(Ok(payload.into())).await.map_err(|_| BrokerError::Closed)
    }

    /// Make the next poll fail with a transport error
    pub async fn send_error(&self, message: impl Into<String>) -> Result<(), BrokerError> {
        self.sender.send(Err(message.into())).await.map_err(|_| BrokerError::Closed)
    }
}

#[async_trait]
impl BrokerConnector for ChannelConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
        let receiver = self.receiver.lock().take().ok_or_else(|| {
            BrokerError::Unavailable("channel receiver already claimed".to_string())
        })?;
        Ok(Box::new(ChannelBroker { receiver: Some(receiver), offset: 0 }))
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}

#[async_trait]
impl BrokerClient for ChannelBroker {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let receiver = self.receiver.as_mut().ok_or(BrokerError::Closed)?;

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(Ok(payload))) => {
                self.offset += 1;
                Ok(Some(BrokerMessage { payload, offset: self.offset }))
            }
            Ok(Some(Err(message))) => Err(BrokerError::Poll(message)),
            Ok(None) => {
                // All senders gone: behave like an idle topic
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
        }
        Ok(())
    }
}

/// Read lines from a blocking reader on a dedicated thread
///
/// Blank lines are dropped. The thread exits at end of input, on a read
/// error, or once the returned connector's client has been closed. A read
/// that never returns does not hold up runtime shutdown.
pub fn spawn_line_reader<R>(
    reader: R,
    name: &str,
    capacity: usize,
) -> Result<ChannelConnector, BrokerError>
where
    R: BufRead + Send + 'static,
{
    let (sender, connector) = ChannelBroker::pair(capacity);
    let source = name.to_string();

    std::thread::Builder::new()
        .name(format!("{}-reader", name))
        .spawn(move || {
            let mut count = 0u64;
            for line in reader.lines() {
                let item = match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => Ok(line.into_bytes()),
                    Err(e) => Err(format!("read from {} failed: {}", source, e)),
                };
                let failed = item.is_err();
                if sender.sender.blocking_send(item).is_err() {
                    tracing::debug!("Consumer of {} went away; reader exiting", source);
                    return;
                }
                if failed {
                    return;
                }
                count += 1;
            }
            tracing::info!("Line source {} exhausted after {} lines", source, count);
        })
        .map_err(|e| BrokerError::Unavailable(format!("cannot spawn {} reader: {}", name, e)))?;

    Ok(connector)
}

/// Newline-delimited JSON read from any async buffered reader
pub struct LineBroker<R> {
    lines: Option<Lines<R>>,
    offset: u64,
    exhausted: bool,
}

impl<R: AsyncBufRead + Unpin + Send> LineBroker<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: Some(reader.lines()), offset: 0, exhausted: false }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> BrokerClient for LineBroker<R> {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.exhausted {
            // End of input: behave like an idle topic
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }
        let lines = self.lines.as_mut().ok_or(BrokerError::Closed)?;

        match tokio::time::timeout(timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                self.offset += 1;
                if line.trim().is_empty() {
                    return Ok(None);
                }
                Ok(Some(BrokerMessage { payload: line.into_bytes(), offset: self.offset }))
            }
            Ok(Ok(None)) => {
                tracing::info!("Line source exhausted after {} lines", self.offset);
                self.exhausted = true;
                Ok(None)
            }
            Ok(Err(e)) => Err(BrokerError::Io(e)),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.lines = None;
        self.exhausted = false;
        Ok(())
    }
}

/// Where a [`LineConnector`] reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSource {
    Stdin,
    File(PathBuf),
}

const STDIN_CHANNEL_CAPACITY: usize = 1024;

/// Opens a line-oriented client over stdin or a file
pub struct LineConnector {
    source: LineSource,
}

impl LineConnector {
    pub fn new(source: LineSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl BrokerConnector for LineConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
        match &self.source {
            LineSource::Stdin => {
                let reader = std::io::BufReader::new(std::io::stdin());
                let connector = spawn_line_reader(reader, "stdin", STDIN_CHANNEL_CAPACITY)?;
                connector.connect().await
            }
            LineSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    BrokerError::Unavailable(format!("cannot open {}: {}", path.display(), e))
                })?;
                Ok(Box::new(LineBroker::new(BufReader::new(file))))
            }
        }
    }

    fn describe(&self) -> String {
        match &self.source {
            LineSource::Stdin => "stdin (JSON lines)".to_string(),
            LineSource::File(path) => format!("{} (JSON lines)", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_channel_broker_delivers_in_order() {
        let (sender, connector) = ChannelBroker::pair(8);
        let mut client = connector.connect().await.unwrap();
        sender.send("first").await.unwrap();
        sender.send("second").await.unwrap();

        let first = client.poll(TIMEOUT).await.unwrap().unwrap();
        let second = client.poll(TIMEOUT).await.unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!((first.offset, second.offset), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_broker_idle_poll_times_out() {
        let (_sender, connector) = ChannelBroker::pair(8);
        let mut client = connector.connect().await.unwrap();
        assert!(client.poll(TIMEOUT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_broker_surfaces_errors_and_close() {
        let (sender, connector) = ChannelBroker::pair(8);
        let mut client = connector.connect().await.unwrap();
        sender.send_error("partition rebalancing").await.unwrap();

        assert!(matches!(client.poll(TIMEOUT).await, Err(BrokerError::Poll(_))));
        client.close().await.unwrap();
        assert!(matches!(client.poll(TIMEOUT).await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn test_channel_connector_is_single_use() {
        let (_sender, connector) = ChannelBroker::pair(1);
        assert!(connector.connect().await.is_ok());
        assert!(matches!(connector.connect().await, Err(BrokerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_line_broker_reads_file() {
        const FILE_TIMEOUT: Duration = Duration::from_millis(500);
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"page_view","page":"/a"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"type":"page_view","page":"/b"}}"#).unwrap();

        let connector = LineConnector::new(LineSource::File(file.path().to_path_buf()));
        let mut client = connector.connect().await.unwrap();

        let first = client.poll(FILE_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(first.offset, 1);
        assert!(client.poll(FILE_TIMEOUT).await.unwrap().is_none());
        let third = client.poll(FILE_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(third.offset, 3);
        assert_eq!(third.payload, br#"{"type":"page_view","page":"/b"}"#);
        assert!(client.poll(FILE_TIMEOUT).await.unwrap().is_none());
    }

    struct HeldOpen(std::sync::mpsc::Receiver<Vec<u8>>);

    impl std::io::Read for HeldOpen {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            // Blocks until the writer sends a chunk; never reports EOF while held
            match self.0.recv() {
                Ok(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[tokio::test]
    async fn test_line_reader_skips_blank_lines() {
        let input = std::io::Cursor::new(b"first\n\n  \nsecond\n".to_vec());
        let connector = spawn_line_reader(input, "test", 8).unwrap();
        let mut client = connector.connect().await.unwrap();

        let first = client.poll(Duration::from_secs(1)).await.unwrap().unwrap();
        let second = client.poll(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!((first.offset, second.offset), (1, 2));
    }

    #[test]
    fn test_runtime_drops_while_line_input_stays_open() {
        let (writer, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        runtime.block_on(async {
            let connector =
                spawn_line_reader(std::io::BufReader::new(HeldOpen(rx)), "held", 8).unwrap();
            let mut client = connector.connect().await.unwrap();
            writer.send(b"hello\n".to_vec()).unwrap();

            let message = client.poll(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(message.payload, b"hello");
            client.close().await.unwrap();
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        drop(writer);
    }

    #[tokio::test]
    async fn test_line_connector_missing_file_is_unavailable() {
        let connector = LineConnector::new(LineSource::File("/nonexistent/events.jsonl".into()));
        assert!(matches!(connector.connect().await, Err(BrokerError::Unavailable(_))));
    }
}
