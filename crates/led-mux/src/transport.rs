//! Resilient line transport over a serial link
//!
//! A [`Transport`] owns one connection to one controller. Once connected it
//! runs two loops:
//!
//! - a **reader** that splits incoming bytes on `\n` and queues each decoded
//!   line (invalid UTF-8 is replaced, not rejected)
//! - a **writer** that drains the outbound queue, appending `\r\n` and
//!   flushing after every line
//!
//! When either loop fails, both are torn down and a single reconnect loop
//! retries at a fixed delay. Queued inbound and outbound lines survive the
//! reconnect; only [`Transport::close`] clears them.
//!
//! The byte stream comes from a [`Connector`], so tests and simulators can
//! substitute `tokio::io::duplex` streams for real ports.

use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::tasks::lock;

/// Any byte stream a transport can run over
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedIo = Box<dyn SerialIo>;

/// Opens the byte stream behind a transport
pub trait Connector: Send + Sync + 'static {
    fn open(&self) -> Result<BoxedIo, TransportError>;
}

/// Connector for a real serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    fn open(&self) -> Result<BoxedIo, TransportError> {
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| TransportError::Open {
                port: self.port.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }
}

/// Connector backed by a closure, for virtual links
pub struct FnConnector<F>(F);

impl<F> FnConnector<F>
where
    F: Fn() -> Result<BoxedIo, TransportError> + Send + Sync + 'static,
{
    pub fn new(open: F) -> Self {
        Self(open)
    }
}

impl<F> Connector for FnConnector<F>
where
    F: Fn() -> Result<BoxedIo, TransportError> + Send + Sync + 'static,
{
    fn open(&self) -> Result<BoxedIo, TransportError> {
        (self.0)()
    }
}

#[derive(Default)]
struct LinkState {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Bumped whenever the current loops are retired
    generation: u64,
    closed: bool,
    last_error: Option<String>,
    last_reconnect_error: Option<String>,
}

struct Inner {
    port: String,
    baud_rate: u32,
    connector: Box<dyn Connector>,
    reconnect_delay: Duration,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
    /// Line taken off the outbound queue but not yet flushed
    unsent: Mutex<Option<String>>,
    link: Mutex<LinkState>,
}

/// A line-oriented connection to one controller
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.inner.port)
            .field("baud_rate", &self.inner.baud_rate)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport {
    /// Transport over `connector`, labelled with `port` and `baud_rate`
    pub fn new(
        port: impl Into<String>,
        baud_rate: u32,
        connector: impl Connector,
        reconnect_delay: Duration,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                port: port.into(),
                baud_rate,
                connector: Box::new(connector),
                reconnect_delay,
                inbound_tx,
                inbound_rx: AsyncMutex::new(inbound_rx),
                outbound_tx,
                outbound_rx: Arc::new(AsyncMutex::new(outbound_rx)),
                unsent: Mutex::new(None),
                link: Mutex::new(LinkState::default()),
            }),
        }
    }

    /// Transport over a real serial port
    pub fn serial(port: impl Into<String>, baud_rate: u32, reconnect_delay: Duration) -> Self {
        let port = port.into();
        let connector = SerialConnector::new(port.clone(), baud_rate);
        Self::new(port, baud_rate, connector, reconnect_delay)
    }

    pub fn port(&self) -> &str {
        &self.inner.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.inner.baud_rate
    }

    /// Open the link and start the reader and writer
    ///
    /// On failure the error is returned and a reconnect loop is scheduled,
    /// so the transport keeps trying on its own.
    pub fn connect(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        let mut link = lock(&inner.link);
        link.closed = false;
        if link.writer.as_ref().is_some_and(|w| !w.is_finished()) {
            return Ok(());
        }
        if let Some(reconnect) = link.reconnect.take() {
            reconnect.abort();
        }

        match inner.connector.open() {
            Ok(io) => {
                inner.start_link(&mut link, io);
                debug!("Connected to {} at {} baud", inner.port, inner.baud_rate);
                Ok(())
            }
            Err(e) => {
                link.last_error = Some(e.to_string());
                inner.schedule_reconnect(&mut link);
                Err(e)
            }
        }
    }

    /// Close the link, stop every loop and drop queued lines
    pub async fn close(&self) {
        let handles = {
            let mut link = lock(&self.inner.link);
            link.closed = true;
            link.generation += 1;
            [link.reconnect.take(), link.reader.take(), link.writer.take()]
        };
        for handle in handles.into_iter().flatten() {
            handle.abort();
            let _ = handle.await;
        }

        *lock(&self.inner.unsent) = None;
        let mut outbound = self.inner.outbound_rx.lock().await;
        while outbound.try_recv().is_ok() {}
        let mut inbound = self.inner.inbound_rx.lock().await;
        while inbound.try_recv().is_ok() {}
        debug!("Closed transport {}", self.inner.port);
    }

    /// Queue a line for transmission
    ///
    /// Lines queue while the link is down and are flushed once it comes
    /// back. Only a closed transport refuses them.
    pub fn send(&self, line: impl Into<String>) -> Result<(), TransportError> {
        if lock(&self.inner.link).closed {
            return Err(TransportError::Closed(self.inner.port.clone()));
        }
        let line = line.into();
        debug!("Queued TX for {}: {}", self.inner.port, line);
        self.inner
            .outbound_tx
            .send(line)
            .map_err(|_| TransportError::Closed(self.inner.port.clone()))
    }

    /// Next inbound line, or `None` if none arrives within `wait`
    pub async fn recv_line(&self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, async {
            let mut inbound = self.inner.inbound_rx.lock().await;
            inbound.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link)
            .writer
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Most recent link failure, cleared on a successful connect
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.link).last_error.clone()
    }
}

impl Inner {
    fn start_link(self: &Arc<Self>, link: &mut LinkState, io: BoxedIo) {
        link.generation += 1;
        link.last_error = None;
        let generation = link.generation;
        let (reader, writer) = tokio::io::split(io);
        link.reader = Some(tokio::spawn(read_loop(self.clone(), generation, reader)));
        link.writer = Some(tokio::spawn(write_loop(self.clone(), generation, writer)));
    }

    /// Shared recovery path for both loops
    ///
    /// Only the first report for a generation acts; later ones find the
    /// generation already bumped and return.
    fn handle_failure(self: &Arc<Self>, generation: u64, reason: String) {
        let mut link = lock(&self.link);
        if link.closed || link.generation != generation {
            return;
        }
        warn!("Serial link {} lost: {}", self.port, reason);
        link.last_error = Some(reason);
        link.generation += 1;
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
        if let Some(writer) = link.writer.take() {
            writer.abort();
        }
        self.schedule_reconnect(&mut link);
    }

    fn schedule_reconnect(self: &Arc<Self>, link: &mut LinkState) {
        if link.reconnect.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }
        link.reconnect = Some(tokio::spawn(reconnect_loop(self.clone())));
    }
}

async fn read_loop(inner: Arc<Inner>, generation: u64, mut reader: ReadHalf<BoxedIo>) {
    let mut buffer = vec![0u8; 1024];
    let mut pending = Vec::new();

    let reason = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break "connection closed".to_string(),
            Ok(n) => {
                pending.extend_from_slice(&buffer[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let decoded = String::from_utf8_lossy(&raw);
                    let line = decoded.trim_end_matches(|c| c == '\r' || c == '\n');
                    if line.is_empty() {
                        continue;
                    }
                    debug!("RX {}: {}", inner.port, line);
                    let _ = inner.inbound_tx.send(line.to_string());
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => break format!("read error: {e}"),
        }
    };

    inner.handle_failure(generation, reason);
}

async fn write_loop(inner: Arc<Inner>, generation: u64, mut writer: WriteHalf<BoxedIo>) {
    let mut queue = inner.outbound_rx.clone().lock_owned().await;

    loop {
        let carried = lock(&inner.unsent).clone();
        let line = match carried {
            Some(line) => line,
            None => match queue.recv().await {
                Some(line) => {
                    *lock(&inner.unsent) = Some(line.clone());
                    line
                }
                None => return,
            },
        };

        let trimmed = line.trim_end();
        debug!("TX {}: {}", inner.port, trimmed);
        let payload = format!("{trimmed}\r\n");
        let result = async {
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                *lock(&inner.unsent) = None;
            }
            Err(e) => {
                drop(queue);
                inner.handle_failure(generation, format!("write error: {e}"));
                return;
            }
        }
    }
}

async fn reconnect_loop(inner: Arc<Inner>) {
    loop {
        tokio::time::sleep(inner.reconnect_delay).await;

        let mut link = lock(&inner.link);
        if link.closed {
            return;
        }
        match inner.connector.open() {
            Ok(io) => {
                inner.start_link(&mut link, io);
                link.last_reconnect_error = None;
                link.reconnect = None;
                info!("Serial link {} reconnected", inner.port);
                return;
            }
            Err(e) => {
                let message = e.to_string();
                if link.last_reconnect_error.as_deref() != Some(message.as_str()) {
                    warn!("Reconnect to {} failed: {}", inner.port, message);
                    link.last_reconnect_error = Some(message.clone());
                }
                link.last_error = Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    /// Hands out one duplex stream per successful open
    fn scripted(
        streams: Vec<Option<DuplexStream>>,
    ) -> FnConnector<impl Fn() -> Result<BoxedIo, TransportError> + Send + Sync> {
        let queue = Mutex::new(streams.into_iter().collect::<VecDeque<_>>());
        FnConnector::new(move || match lock(&queue).pop_front().flatten() {
            Some(stream) => Ok(Box::new(stream) as BoxedIo),
            None => Err(TransportError::Open {
                port: "sim".into(),
                reason: "unavailable".into(),
            }),
        })
    }

    #[tokio::test]
    async fn test_lines_flow_both_ways() {
        let (ours, theirs) = duplex(256);
        let transport =
            Transport::new("sim", 115_200, scripted(vec![Some(ours)]), Duration::from_millis(10));
        transport.connect().unwrap();
        assert!(transport.is_connected());

        let (read_half, mut write_half) = tokio::io::split(theirs);
        write_half.write_all(b"{\"t\":\"status\"}\r\n\n\xffok\n").await.unwrap();
        assert_eq!(
            transport.recv_line(Duration::from_secs(1)).await.as_deref(),
            Some("{\"t\":\"status\"}")
        );
        assert_eq!(
            transport.recv_line(Duration::from_secs(1)).await.as_deref(),
            Some("\u{fffd}ok")
        );

        transport.send(r#"{"cm":"status"}"#).unwrap();
        let mut lines = BufReader::new(read_half).lines();
        let sent = lines.next_line().await.unwrap().unwrap();
        assert_eq!(sent.trim_end(), "{\"cm\":\"status\"}");
    }

    #[tokio::test]
    async fn test_recv_times_out_without_data() {
        let (ours, _theirs) = duplex(64);
        let transport =
            Transport::new("sim", 9600, scripted(vec![Some(ours)]), Duration::from_millis(10));
        transport.connect().unwrap();
        assert_eq!(transport.recv_line(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_retrying() {
        let (ours, _theirs) = duplex(64);
        let transport = Transport::new(
            "sim",
            9600,
            scripted(vec![None, None, Some(ours)]),
            Duration::from_millis(5),
        );
        assert!(transport.connect().is_err());
        assert!(transport.last_error().unwrap().contains("unavailable"));

        for _ in 0..100 {
            if transport.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(transport.is_connected());
        assert_eq!(transport.last_error(), None);
    }

    #[tokio::test]
    async fn test_close_clears_queues_and_refuses_sends() {
        let transport = Transport::new("sim", 9600, scripted(vec![]), Duration::from_millis(5));
        let _ = transport.connect();
        transport.send("queued").unwrap();
        transport.close().await;
        assert!(matches!(transport.send("late"), Err(TransportError::Closed(_))));
        assert!(!transport.is_connected());
    }
}
