//! Event sinks.
//!
//! Audit events are serialized once and handed to every configured sink.
//! Sinks are created through a [`SinkRegistry`] on first use and live for the
//! rest of the process. Each name is initialized at most once, in its own
//! cell, so a slow sink never holds up the others. File and socket sinks
//! buffer output and flush when the buffer reaches its threshold, on the
//! optional periodic flush, and on [`shutdown`]. A socket sink whose write
//! fails reconnects on its next flush.

use super::event::EventRecord;
use crate::config::{EventLogConfig, SocketProtocol};
use crate::error::{Result, WafError};
use crate::metrics::MetricsCollector;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracing target of events written to the diagnostic log.
pub const EVENT_TARGET: &str = "fe_waf::event";

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

pub trait EventSink: Send + Sync {
    fn write(&self, line: &str) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates a sink from the event log settings.
pub type SinkFactory = fn(&EventLogConfig) -> Result<Arc<dyn EventSink>>;

/// Sink names known to the firewall.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    factories: BTreeMap<String, SinkFactory>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `error`, `file` and `socket` sinks.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("error", diagnostic_sink);
        registry.register("file", file_sink);
        registry.register("socket", socket_sink);
        registry
    }

    pub fn register(&mut self, name: &str, factory: SinkFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    fn create(&self, name: &str, config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| WafError::UnknownSink(name.to_string()))?;
        factory(config)
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Writes events to the diagnostic log.
#[derive(Debug, Default)]
pub struct DiagnosticSink;

impl EventSink for DiagnosticSink {
    fn write(&self, line: &str) -> io::Result<()> {
        warn!(target: EVENT_TARGET, "{}", line);
        Ok(())
    }
}

/// Opens (or reopens) the writer behind a [`BufferedSink`].
pub type Connector = Box<dyn Fn() -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

struct Buffered {
    buffer: Vec<u8>,
    /// `None` after a failed write on a reconnectable sink.
    writer: Option<Box<dyn Write + Send>>,
}

/// Newline-delimited sink over any writer, flushed by size threshold.
pub struct BufferedSink {
    threshold: usize,
    connect: Option<Connector>,
    state: Mutex<Buffered>,
}

impl BufferedSink {
    pub fn new(writer: Box<dyn Write + Send>, threshold: usize) -> Self {
        Self {
            threshold,
            connect: None,
            state: Mutex::new(Buffered {
                buffer: Vec::with_capacity(threshold),
                writer: Some(writer),
            }),
        }
    }

    /// Sink that opens its writer through `connect`, and again after a failed write.
    pub fn reconnecting(connect: Connector, threshold: usize) -> Result<Self> {
        let writer = connect()?;
        let mut sink = Self::new(writer, threshold);
        sink.connect = Some(connect);
        Ok(sink)
    }

    /// Append-only file sink.
    pub fn file(path: &str, threshold: usize) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file), threshold))
    }

    pub fn tcp(host: &str, port: u16, threshold: usize) -> Result<Self> {
        let host = host.to_string();
        Self::reconnecting(
            Box::new(move || {
                let stream = connect_tcp(&host, port)?;
                Ok(Box::new(stream) as Box<dyn Write + Send>)
            }),
            threshold,
        )
    }

    pub fn udp(host: &str, port: u16, threshold: usize) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        Ok(Self::new(Box::new(Datagrams(socket)), threshold))
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn flush_locked(&self, state: &mut Buffered) -> io::Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        // a failed write drops the batch
        let pending = std::mem::take(&mut state.buffer);

        let writer = match state.writer {
            Some(ref mut writer) => writer,
            None => {
                let connect = self
                    .connect
                    .as_ref()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sink closed"))?;
                debug!("Reconnecting event sink");
                state.writer.insert(connect()?)
            }
        };

        let written = writer.write_all(&pending).and_then(|()| writer.flush());
        if written.is_err() && self.connect.is_some() {
            state.writer = None;
        }
        written
    }
}

impl EventSink for BufferedSink {
    fn write(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.buffer.extend_from_slice(line.as_bytes());
        state.buffer.push(b'\n');
        if state.buffer.len() >= self.threshold {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.flush_locked(&mut self.state.lock())
    }
}

/// Connect with a bounded timeout, trying each resolved address in turn.
fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT) {
            Ok(stream) => {
                stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address for {}", host))
    }))
}

/// One datagram per flushed batch.
struct Datagrams(UdpSocket);

impl Write for Datagrams {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn diagnostic_sink(_config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
    Ok(Arc::new(DiagnosticSink))
}

fn file_sink(config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
    Ok(Arc::new(BufferedSink::file(&config.path, config.buffer_size)?))
}

fn socket_sink(config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
    let sink = match config.protocol {
        SocketProtocol::Tcp => BufferedSink::tcp(&config.host, config.port, config.buffer_size)?,
        SocketProtocol::Udp => BufferedSink::udp(&config.host, config.port, config.buffer_size)?,
    };
    Ok(Arc::new(sink))
}

/// Lazily created sink. `None` inside marks a sink whose initialization
/// failed; it is not retried.
type SinkCell = Arc<OnceLock<Option<Arc<dyn EventSink>>>>;

lazy_static! {
    /// Process-wide sink cells by name. The lock only guards the map; sinks
    /// are created outside it.
    static ref SINKS: Mutex<HashMap<String, SinkCell>> = Mutex::new(HashMap::new());
}

static FLUSHER_STARTED: AtomicBool = AtomicBool::new(false);
static FLUSHER_STOP: AtomicBool = AtomicBool::new(false);

fn instance(name: &str, registry: &SinkRegistry, config: &EventLogConfig) -> Option<Arc<dyn EventSink>> {
    let cell = Arc::clone(SINKS.lock().entry(name.to_string()).or_default());

    let sink = cell.get_or_init(|| {
        let created = match registry.create(name, config) {
            Ok(sink) => {
                info!("Event sink '{}' initialized", name);
                Some(sink)
            }
            Err(e) => {
                warn!("Event sink '{}' could not be initialized: {}", name, e);
                None
            }
        };
        if config.flush_interval_secs > 0 {
            start_flusher(Duration::from_secs(config.flush_interval_secs));
        }
        created
    });
    sink.clone()
}

fn start_flusher(interval: Duration) {
    if FLUSHER_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    FLUSHER_STOP.store(false, Ordering::SeqCst);

    let spawned = thread::Builder::new()
        .name("fe-waf-event-flush".to_string())
        .spawn(move || {
            debug!("Event flush thread started ({:?})", interval);
            while !FLUSHER_STOP.load(Ordering::SeqCst) {
                thread::sleep(interval);
                flush_all();
            }
        });

    if let Err(e) = spawned {
        warn!("Event flush thread could not be started: {}", e);
        FLUSHER_STARTED.store(false, Ordering::SeqCst);
    }
}

fn flush_all() {
    let sinks: Vec<(String, Arc<dyn EventSink>)> = SINKS
        .lock()
        .iter()
        .filter_map(|(name, cell)| cell.get().cloned().flatten().map(|s| (name.clone(), s)))
        .collect();

    for (name, sink) in sinks {
        if let Err(e) = sink.flush() {
            warn!("Event sink '{}' flush failed: {}", name, e);
        }
    }
}

/// Flush every initialized sink and stop the periodic flush thread.
pub fn shutdown() {
    FLUSHER_STOP.store(true, Ordering::SeqCst);
    FLUSHER_STARTED.store(false, Ordering::SeqCst);
    flush_all();
}

/// Dispatches audit events to the configured sinks.
#[derive(Clone)]
pub struct EventLogger {
    config: EventLogConfig,
    registry: SinkRegistry,
}

impl EventLogger {
    pub fn new(config: EventLogConfig, registry: SinkRegistry) -> Result<Self> {
        if let Some(unknown) = config.targets.iter().find(|t| !registry.contains(t)) {
            return Err(WafError::UnknownSink(unknown.clone()));
        }
        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    pub fn targets(&self) -> &[String] {
        &self.config.targets
    }

    /// Best effort: sink failures are logged and counted, never returned.
    pub fn emit(&self, record: &EventRecord) {
        let line = record.to_json();
        for target in &self.config.targets {
            let Some(sink) = instance(target, &self.registry, &self.config) else {
                MetricsCollector::new().inc_event_dropped(target);
                continue;
            };
            if let Err(e) = sink.write(&line) {
                warn!("Event sink '{}' write failed: {}", target, e);
                MetricsCollector::new().inc_event_dropped(target);
            }
        }
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger")
            .field("targets", &self.config.targets)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::context::RequestContext;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_buffered_sink_flushes_at_threshold() {
        let out = SharedBuf::default();
        let sink = BufferedSink::new(Box::new(out.clone()), 16);

        sink.write("short").unwrap();
        assert!(out.0.lock().is_empty());
        assert_eq!(sink.buffered_len(), 6);

        sink.write("long enough line").unwrap();
        assert_eq!(out.0.lock().as_slice(), b"short\nlong enough line\n");
        assert_eq!(sink.buffered_len(), 0);

        sink.write("tail").unwrap();
        sink.flush().unwrap();
        assert!(out.0.lock().ends_with(b"tail\n"));
    }

    /// Writer that fails every write once `down` is set, and stays failed.
    struct Flaky {
        out: SharedBuf,
        down: Arc<AtomicBool>,
        broken: bool,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken || self.down.load(Ordering::SeqCst) {
                self.broken = true;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.out.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_reconnects_after_failed_write() {
        let out = SharedBuf::default();
        let down = Arc::new(AtomicBool::new(false));
        let connects = Arc::new(AtomicUsize::new(0));

        let connect: Connector = {
            let (out, down, connects) = (out.clone(), Arc::clone(&down), Arc::clone(&connects));
            Box::new(move || {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Flaky {
                    out: out.clone(),
                    down: Arc::clone(&down),
                    broken: false,
                }) as Box<dyn Write + Send>)
            })
        };
        let sink = BufferedSink::reconnecting(connect, 1).unwrap();

        sink.write("first").unwrap();
        down.store(true, Ordering::SeqCst);
        assert!(sink.write("lost").is_err());
        assert_eq!(sink.buffered_len(), 0);

        down.store(false, Ordering::SeqCst);
        sink.write("second").unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(out.0.lock().as_slice(), b"first\nsecond\n");
    }

    #[test]
    fn test_unreachable_tcp_collector_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let started = std::time::Instant::now();
        assert!(BufferedSink::tcp("127.0.0.1", port, 16).is_err());
        assert!(started.elapsed() <= SOCKET_TIMEOUT + Duration::from_secs(1));
    }

    #[test]
    fn test_slow_sink_does_not_block_other_sinks() {
        fn slow_sink(_config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
            thread::sleep(Duration::from_millis(500));
            Ok(Arc::new(CountingSink))
        }

        let mut registry = SinkRegistry::new();
        registry.register("slow-test", slow_sink);
        registry.register("fast-test", diagnostic_sink);
        let config = EventLogConfig::default();

        let slow = {
            let (registry, config) = (registry.clone(), config.clone());
            thread::spawn(move || instance("slow-test", &registry, &config))
        };
        thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert!(instance("fast-test", &registry, &config).is_some());
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(slow.join().unwrap().is_some());
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let path = path.to_str().unwrap();

        let sink = BufferedSink::file(path, 1024).unwrap();
        sink.write("{\"a\":1}").unwrap();
        sink.write("{\"a\":2}").unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut config = EventLogConfig::default();
        config.targets = vec!["kafka".to_string()];
        let err = EventLogger::new(config, SinkRegistry::with_builtin()).unwrap_err();
        assert!(matches!(err, WafError::UnknownSink(_)));
    }

    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct CountingSink;

    impl EventSink for CountingSink {
        fn write(&self, _line: &str) -> io::Result<()> {
            Ok(())
        }
    }

    fn counting_sink(_config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
        CREATED.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingSink))
    }

    #[test]
    fn test_sink_initialized_once() {
        let mut registry = SinkRegistry::with_builtin();
        registry.register("counting-test", counting_sink);

        let mut config = EventLogConfig::default();
        config.targets = vec!["counting-test".to_string()];
        let logger = EventLogger::new(config, registry).unwrap();

        let record = EventRecord::new(&RequestContext::new(), "127.0.0.1", "GET", "/");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let logger = logger.clone();
                let record = record.clone();
                thread::spawn(move || logger.emit(&record))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        logger.emit(&record);

        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    fn failing_sink(_config: &EventLogConfig) -> Result<Arc<dyn EventSink>> {
        Err(WafError::Io(io::Error::new(io::ErrorKind::Other, "unreachable")))
    }

    #[test]
    fn test_failed_sink_does_not_propagate() {
        let mut registry = SinkRegistry::new();
        registry.register("failing-test", failing_sink);

        let mut config = EventLogConfig::default();
        config.targets = vec!["failing-test".to_string()];
        let logger = EventLogger::new(config, registry).unwrap();

        logger.emit(&EventRecord::new(&RequestContext::new(), "127.0.0.1", "GET", "/"));
        shutdown();
    }
}
