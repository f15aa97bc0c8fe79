//! Position feed ingestion.
//!
//! A [`LineSource`] produces newline-delimited JSON reports from some
//! transport. [`IngestLoop`] reads one line at a time, pushes it through the
//! [`TrajectoryStore`] to completion and only then reads the next. Network
//! sources are reconnected after a fixed delay; a file replay ends at EOF.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, FeedTransport};
use crate::error::{Error, Result};
use crate::report::AircraftReport;
use crate::sink::FlyoverSink;
use crate::store::{StoreStats, TrajectoryStore};

/// Largest datagram accepted by [`UdpLineSource`].
const MAX_DATAGRAM: usize = 65_536;

/// Longest feed line in bytes, newline excluded. Longer lines are dropped.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A transport producing feed lines.
#[async_trait]
pub trait LineSource: Send {
    /// Human readable address for logs.
    fn describe(&self) -> String;

    /// Whether the source ends for good once exhausted.
    ///
    /// Finite sources are not reconnected.
    fn is_finite(&self) -> bool {
        false
    }

    /// Open or reopen the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeedConnect`] if the transport cannot be opened.
    async fn connect(&mut self) -> Result<()>;

    /// Read the next raw line, `None` once the source is closed.
    ///
    /// Lines are not decoded; the ingest loop treats invalid UTF-8 like any
    /// other malformed line. Must be cancel safe: a line is either returned
    /// or still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the transport fails.
    async fn next_line(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Splits a byte stream into lines of at most [`MAX_LINE_LENGTH`] bytes.
///
/// An overlong line is discarded up to its newline. Partial reads stay in
/// `buf`, which keeps [`next_line`](Self::next_line) cancel safe.
#[derive(Debug)]
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(8192, reader),
            buf: Vec::new(),
            discarding: false,
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let limit = (MAX_LINE_LENGTH + 1).saturating_sub(self.buf.len()) as u64;
            let n = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if self.buf.last() == Some(&b'\n') {
                let line = std::mem::take(&mut self.buf);
                if std::mem::replace(&mut self.discarding, false) {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.buf.len() > MAX_LINE_LENGTH {
                if !self.discarding {
                    warn!("dropping feed line longer than {} bytes", MAX_LINE_LENGTH);
                }
                self.discarding = true;
                self.buf.clear();
                continue;
            }

            if n == 0 {
                // eof, possibly after an unterminated last line
                let rest = std::mem::take(&mut self.buf);
                if std::mem::replace(&mut self.discarding, false) || rest.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(rest));
            }
        }
    }
}

/// Newline-delimited JSON over TCP, e.g. the readsb JSON port.
#[derive(Debug)]
pub struct TcpLineSource {
    address: String,
    lines: Option<LineReader<TcpStream>>,
}

impl TcpLineSource {
    /// Create a source connecting to `address` (`host:port`).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            lines: None,
        }
    }
}

#[async_trait]
impl LineSource for TcpLineSource {
    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }

    async fn connect(&mut self) -> Result<()> {
        self.lines = None;
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| Error::feed_connect(&self.address, e))?;
        self.lines = Some(LineReader::new(stream));
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.lines.as_mut() {
            Some(lines) => Ok(lines.next_line().await?),
            None => Ok(None),
        }
    }
}

/// JSON lines received as UDP datagrams.
///
/// Each datagram may carry several newline separated lines.
#[derive(Debug)]
pub struct UdpLineSource {
    address: String,
    socket: Option<UdpSocket>,
    pending: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
}

impl UdpLineSource {
    /// Create a source listening on `address` (`host:port`).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            socket: None,
            pending: VecDeque::new(),
            buf: vec![0; MAX_DATAGRAM],
        }
    }

    /// Address the socket is bound to, once connected.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl LineSource for UdpLineSource {
    fn describe(&self) -> String {
        format!("udp://{}", self.address)
    }

    async fn connect(&mut self) -> Result<()> {
        self.pending.clear();
        let socket = UdpSocket::bind(&self.address)
            .await
            .map_err(|e| Error::feed_connect(&self.address, e))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            let Some(socket) = &self.socket else {
                return Ok(None);
            };

            let n = socket.recv(&mut self.buf).await?;
            self.pending.extend(
                self.buf[..n]
                    .split(|&b| b == b'\n')
                    .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
                    .map(<[u8]>::to_vec),
            );
        }
    }
}

/// Replay of a recorded feed from a file, or stdin for `-`.
pub struct FileLineSource {
    path: PathBuf,
    lines: Option<LineReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl std::fmt::Debug for FileLineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLineSource")
            .field("path", &self.path)
            .field("open", &self.lines.is_some())
            .finish()
    }
}

impl FileLineSource {
    /// Create a source reading `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: None,
        }
    }

    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }
}

#[async_trait]
impl LineSource for FileLineSource {
    fn describe(&self) -> String {
        if self.is_stdin() {
            "stdin".to_string()
        } else {
            self.path.display().to_string()
        }
    }

    fn is_finite(&self) -> bool {
        true
    }

    async fn connect(&mut self) -> Result<()> {
        let reader: Box<dyn AsyncRead + Send + Unpin> = if self.is_stdin() {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|e| Error::feed_connect(self.path.display().to_string(), e))?;
            Box::new(file)
        };
        self.lines = Some(LineReader::new(reader));
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.lines.as_mut() {
            Some(lines) => Ok(lines.next_line().await?),
            None => Ok(None),
        }
    }
}

/// Build the network source selected by the feed configuration.
#[must_use]
pub fn source_from_config(config: &Config) -> Box<dyn LineSource> {
    match config.feed.transport {
        FeedTransport::Tcp => Box::new(TcpLineSource::new(&config.feed.address)),
        FeedTransport::Udp => Box::new(UdpLineSource::new(&config.feed.address)),
    }
}

/// A cloneable handle that ends an [`IngestLoop`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop_signal: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Create a handle that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the loop to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Wait until [`stop`](Self::stop) is called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.should_stop() {
                return;
            }
            notified.await;
        }
    }
}

/// Counters of one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Lines read from the source.
    pub lines: u64,
    /// Lines that were not a JSON report.
    pub malformed: u64,
    /// Reports missing a required field.
    pub rejected: u64,
    /// Times the source was reopened after closing or failing.
    pub reconnects: u64,
    /// Records removed by retention.
    pub pruned: u64,
    /// Counters of the trajectory store.
    pub store: StoreStats,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines={} malformed={} rejected={} events={} trajectories={} reconnects={}",
            self.lines,
            self.malformed,
            self.rejected,
            self.store.events,
            self.store.dumps,
            self.reconnects
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Retention {
    interval: Duration,
    max_age: chrono::Duration,
}

/// Reads a [`LineSource`] into a [`TrajectoryStore`].
#[derive(Debug)]
pub struct IngestLoop<S> {
    store: TrajectoryStore<S>,
    stop: StopHandle,
    retry_delay: Duration,
    retention: Option<Retention>,
    stats: IngestStats,
}

impl<S: FlyoverSink> IngestLoop<S> {
    /// Create a loop feeding `store` until `stop` is triggered.
    pub fn new(store: TrajectoryStore<S>, stop: StopHandle) -> Self {
        Self {
            store,
            stop,
            retry_delay: Duration::from_secs(1),
            retention: None,
            stats: IngestStats::default(),
        }
    }

    /// Delay between reconnect attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Prune the sink every `interval`, keeping records younger than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is zero or `max_age` is out of range.
    pub fn with_retention(mut self, interval: Duration, max_age: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::config_validation("prune interval must not be zero"));
        }
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::config_validation(format!("max age out of range: {e}")))?;
        self.retention = Some(Retention { interval, max_age });
        Ok(self)
    }

    /// The store being fed.
    #[must_use]
    pub fn store(&self) -> &TrajectoryStore<S> {
        &self.store
    }

    /// Finish and return the store.
    pub fn into_store(self) -> TrajectoryStore<S> {
        self.store
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            store: self.store.stats(),
            ..self.stats
        }
    }

    /// Run until the stop handle fires or a finite source is exhausted.
    ///
    /// Network errors never end the loop; they are logged and the source is
    /// reopened after the retry delay.
    ///
    /// # Errors
    ///
    /// Returns an error only if a finite source cannot be opened or read.
    pub async fn run<L>(&mut self, source: &mut L) -> Result<IngestStats>
    where
        L: LineSource + ?Sized,
    {
        let stop = self.stop.clone();
        let mut prune_timer = tokio::time::interval(
            self.retention
                .map_or(Duration::from_secs(3600), |r| r.interval),
        );
        prune_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if self.retention.is_some() {
            self.prune();
            prune_timer.reset();
        }
        let mut first_attempt = true;

        'session: while !stop.should_stop() {
            if !first_attempt {
                self.stats.reconnects += 1;
                tokio::select! {
                    () = tokio::time::sleep(self.retry_delay) => {}
                    () = stop.stopped() => break 'session,
                }
            }
            first_attempt = false;

            if let Err(e) = source.connect().await {
                if source.is_finite() {
                    return Err(e);
                }
                warn!("{}, retrying in {:?}", e, self.retry_delay);
                continue;
            }
            info!("reading feed from {}", source.describe());

            loop {
                tokio::select! {
                    biased;

                    line = source.next_line() => match line {
                        Ok(Some(line)) => self.process_bytes(&line),
                        Ok(None) => {
                            info!("feed {} closed", source.describe());
                            break;
                        }
                        Err(e) => {
                            if source.is_finite() {
                                return Err(e);
                            }
                            warn!("feed {} failed: {}", source.describe(), e);
                            break;
                        }
                    },
                    _ = prune_timer.tick(), if self.retention.is_some() => self.prune(),
                    () = stop.stopped() => break 'session,
                }
            }

            if source.is_finite() {
                break;
            }
        }

        let stats = self.stats();
        info!("ingest finished: {}", stats);
        Ok(stats)
    }

    /// Decode one raw feed line and push it into the store.
    pub fn process_bytes(&mut self, raw: &[u8]) {
        match std::str::from_utf8(raw) {
            Ok(line) => self.process_line(line),
            Err(e) => {
                self.stats.lines += 1;
                self.stats.malformed += 1;
                debug!("skipping line that is not UTF-8: {}", e);
            }
        }
    }

    /// Parse one feed line and push it into the store.
    pub fn process_line(&mut self, line: &str) {
        self.stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let report = match AircraftReport::from_line(line) {
            Ok(report) => report,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("skipping malformed line: {}", e);
                return;
            }
        };

        match self.store.update(&report) {
            Ok(outcome) => trace!(?outcome, "report processed"),
            Err(e) => {
                self.stats.rejected += 1;
                debug!("rejected report: {}", e);
            }
        }
    }

    fn prune(&mut self) {
        let Some(retention) = self.retention else {
            return;
        };
        match self.store.sink_mut().prune(retention.max_age) {
            Ok(n) => self.stats.pruned += n as u64,
            Err(e) => warn!("failed to prune old records: {}", e),
        }
    }
}
