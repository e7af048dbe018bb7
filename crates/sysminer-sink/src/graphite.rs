use crate::Sink;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::stats::RuntimeStats;
use sysminer_common::types::{Metric, MetricBatch};
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;

pub const NAME: &str = "graphite";

/// Upper bound for establishing a connection, including name resolution.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// First segment of every metric path written by the agent.
pub const PREFIX_ROOT: &str = "sysminerd";

/// Transport used to reach the graphite server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(ModuleError::invalid(format!(
                "graphite protocol '{s}' is not supported"
            ))),
        }
    }
}

/// Validated graphite module settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphiteSettings {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Upper bound of the retry queue; `0` keeps every undelivered record.
    pub max_queue_size: usize,
}

impl GraphiteSettings {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self, ModuleError> {
        let host = settings.string("hostname")?;
        if host.is_empty() {
            return Err(ModuleError::invalid("graphite hostname must be specified"));
        }

        let port = settings.integer("port")?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ModuleError::invalid(format!("invalid graphite port number: {port}")))?;

        let protocol = settings.optional_string("protocol")?.unwrap_or("tcp").parse()?;

        let max_queue_size = settings.optional_integer("max_queue_size")?.unwrap_or(0);
        let max_queue_size = usize::try_from(max_queue_size).map_err(|_| {
            ModuleError::invalid(format!(
                "graphite max_queue_size must not be negative, got {max_queue_size}"
            ))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
            protocol,
            max_queue_size,
        })
    }
}

/// Metric path prefix for a host: `sysminerd.<host>`. The host segment
/// must already be free of dots, see [`ModuleContext::sanitized_hostname`].
///
/// # Examples
///
/// ```
/// use sysminer_sink::graphite::metric_prefix;
///
/// assert_eq!(metric_prefix("db1_dc2_example_com"), "sysminerd.db1_dc2_example_com");
/// ```
pub fn metric_prefix(host: &str) -> String {
    format!("{PREFIX_ROOT}.{host}")
}

/// Serializes one metric as a plaintext protocol line.
pub fn format_record(prefix: &str, collector: &str, metric: &Metric) -> String {
    format!(
        "{prefix}.{collector}.{} {:.6} {}\n",
        metric.name,
        metric.value,
        metric.timestamp.timestamp()
    )
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn open(settings: &GraphiteSettings) -> io::Result<Self> {
        timeout(CONNECT_TIMEOUT, Self::establish(settings))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }

    async fn establish(settings: &GraphiteSettings) -> io::Result<Self> {
        let target = (settings.host.as_str(), settings.port);
        match settings.protocol {
            Protocol::Tcp => Ok(Self::Tcp(TcpStream::connect(target).await?)),
            Protocol::Udp => {
                let remote = lookup_host(target).await?.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
                })?;
                let local = if remote.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(remote).await?;
                Ok(Self::Udp(socket))
            }
        }
    }

    /// Writes one record, returning how many bytes the transport accepted.
    async fn write_record(&mut self, record: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(record).await,
            Self::Udp(socket) => socket.send(record).await,
        }
    }

    async fn close(self) -> io::Result<()> {
        match self {
            Self::Tcp(mut stream) => stream.shutdown().await,
            Self::Udp(_) => Ok(()),
        }
    }
}

/// Graphite plaintext protocol sink with reconnect and a bounded retry
/// queue.
///
/// Undelivered records are replayed oldest first on the next call. When
/// the queue grows past `max_queue_size` the oldest records are discarded.
pub struct GraphiteSink {
    settings: Option<GraphiteSettings>,
    prefix: String,
    conn: Option<Connection>,
    queue: VecDeque<String>,
    stats: Arc<RuntimeStats>,
}

impl GraphiteSink {
    pub fn new() -> Self {
        Self {
            settings: None,
            prefix: PREFIX_ROOT.to_string(),
            conn: None,
            queue: VecDeque::new(),
            stats: Arc::new(RuntimeStats::new()),
        }
    }

    /// Builds a sink from already validated settings without connecting.
    pub fn configured(prefix: impl Into<String>, settings: GraphiteSettings, stats: Arc<RuntimeStats>) -> Self {
        Self {
            settings: Some(settings),
            prefix: prefix.into(),
            conn: None,
            queue: VecDeque::new(),
            stats,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Records waiting for delivery, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    async fn open(&self) -> Result<Connection> {
        let settings = self
            .settings
            .as_ref()
            .context("graphite sink used before init")?;
        Connection::open(settings).await.with_context(|| {
            format!(
                "failed to connect to graphite at {}:{} over {}",
                settings.host, settings.port, settings.protocol
            )
        })
    }

    fn serialize(&self, batches: &[MetricBatch]) -> Vec<String> {
        let mut records = Vec::new();
        for batch in batches {
            for metric in &batch.metrics {
                if !metric.value.is_finite() {
                    tracing::debug!(
                        collector = %batch.collector,
                        metric = %metric.name,
                        "Skipping non-finite metric value"
                    );
                    continue;
                }
                records.push(format_record(&self.prefix, &batch.collector, metric));
            }
        }
        records
    }

    async fn deliver(&mut self, batches: &[MetricBatch]) -> Result<()> {
        let mut pending = std::mem::take(&mut self.queue);
        pending.extend(self.serialize(batches));
        if pending.is_empty() {
            return Ok(());
        }

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => match self.open().await {
                Ok(conn) => {
                    tracing::info!("Reconnected to graphite");
                    conn
                }
                Err(e) => {
                    self.queue = pending;
                    self.stats.record_delivery_failure();
                    return Err(e.context(format!("{} records queued", self.queue.len())));
                }
            },
        };

        let mut sent = 0u64;
        while let Some(record) = pending.pop_front() {
            match conn.write_record(record.as_bytes()).await {
                Ok(n) if n == record.len() => sent += 1,
                outcome => {
                    let reason = match outcome {
                        Ok(n) => format!("short write of {n}/{} bytes", record.len()),
                        Err(e) => e.to_string(),
                    };
                    pending.push_front(record);
                    self.queue = pending;
                    self.stats.record_sent(sent);
                    self.stats.record_delivery_failure();
                    // Dropping the connection closes it; the next call reconnects
                    drop(conn);
                    return Err(anyhow!(
                        "graphite write failed ({reason}), {} records queued",
                        self.queue.len()
                    ));
                }
            }
        }

        self.conn = Some(conn);
        self.stats.record_sent(sent);
        tracing::debug!(records = sent, "Metrics delivered to graphite");
        Ok(())
    }

    /// Evicts the oldest records beyond `max_queue_size`, returning how
    /// many were discarded.
    fn trim_queue(&mut self) -> usize {
        let max = self.settings.as_ref().map_or(0, |s| s.max_queue_size);
        if max == 0 || self.queue.len() <= max {
            return 0;
        }
        let dropped = self.queue.len() - max;
        self.queue.drain(..dropped);
        tracing::warn!(
            dropped,
            max_queue_size = max,
            "Graphite metric queue overflow, discarding oldest records"
        );
        self.stats.record_dropped(dropped as u64);
        dropped
    }
}

impl Default for GraphiteSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for GraphiteSink {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self, ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        let settings = GraphiteSettings::from_settings(settings)?;
        self.prefix = metric_prefix(&ctx.sanitized_hostname());
        self.stats = Arc::clone(&ctx.stats);
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            protocol = %settings.protocol,
            max_queue_size = settings.max_queue_size,
            prefix = %self.prefix,
            "Graphite sink configured"
        );
        self.settings = Some(settings);

        match self.open().await {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => Err(ModuleError::connect(NAME, format!("{e:#}"))),
        }
    }

    async fn send(&mut self, batches: &[MetricBatch]) -> Result<()> {
        let result = self.deliver(batches).await;
        self.trim_queue();
        result
    }

    async fn teardown(&mut self) -> Result<()> {
        if !self.queue.is_empty() {
            tracing::warn!(
                records = self.queue.len(),
                "Discarding undelivered graphite records"
            );
        }
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .await
                .context("failed to close graphite connection"),
            None => Ok(()),
        }
    }
}
