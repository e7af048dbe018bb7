use crate::Collector;
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "redis";

const DEFAULT_TIMEOUT_SECS: i64 = 5;

/// Extracts numeric fields from an `INFO` reply.
///
/// Everything before the `# Clients` section (server identification) is
/// ignored, as are human readable duplicates such as `used_memory_human`.
/// Keyspace lines (`db0:keys=1,expires=0,avg_ttl=0`) expand into one value
/// per attribute (`db0.keys`, `db0.expires`, ...).
pub fn parse_info(info: &str) -> Vec<(String, f64)> {
    let mut values = Vec::new();
    let mut in_stats = false;
    let mut in_keyspace = false;

    for line in info.lines().map(str::trim) {
        if let Some(section) = line.strip_prefix('#') {
            let section = section.trim();
            in_stats |= section == "Clients";
            in_keyspace = section == "Keyspace";
            continue;
        }
        if !in_stats {
            continue;
        }
        let Some((key, raw)) = line.split_once(':') else {
            continue;
        };
        if key.contains("human") || raw.contains(':') {
            continue;
        }

        if in_keyspace {
            for pair in raw.split(',') {
                let Some((attr, value)) = pair.split_once('=') else {
                    continue;
                };
                if let Some(value) = parse_finite(value) {
                    values.push((format!("{key}.{attr}"), value));
                }
            }
        } else if let Some(value) = parse_finite(raw) {
            values.push((key.to_string(), value));
        }
    }

    values
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Redis connection URL for `host:port`, bracketing IPv6 literals.
fn redis_url(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("redis://[{host}]:{port}/")
    } else {
        format!("redis://{host}:{port}/")
    }
}

/// Polls a redis server with `INFO`, reconnecting lazily after failures.
pub struct RedisCollector {
    client: Option<::redis::Client>,
    conn: Option<::redis::Connection>,
    timeout: Duration,
}

impl RedisCollector {
    pub fn new() -> Self {
        Self {
            client: None,
            conn: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64),
        }
    }

    fn connect(&mut self) -> Result<&mut ::redis::Connection> {
        let client = self
            .client
            .as_ref()
            .context("redis collector used before init")?;
        let conn = client
            .get_connection_with_timeout(self.timeout)
            .context("failed to connect to redis")?;
        Ok(self.conn.insert(conn))
    }
}

impl Default for RedisCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for RedisCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        let host = settings.string("host")?;
        if host.is_empty() {
            return Err(ModuleError::invalid("redis host must not be empty"));
        }
        let port = settings.integer("port")?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ModuleError::invalid(format!("invalid redis port number: {port}")))?;
        let timeout_secs = settings
            .optional_integer("timeout_secs")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs <= 0 {
            return Err(ModuleError::invalid(format!(
                "redis timeout_secs must be positive, got {timeout_secs}"
            )));
        }
        self.timeout = Duration::from_secs(timeout_secs as u64);

        let url = redis_url(host, port);
        let client = ::redis::Client::open(url.as_str())
            .map_err(|e| ModuleError::invalid(format!("invalid redis address {url}: {e}")))?;
        self.client = Some(client);

        self.connect()
            .map(|_| tracing::info!(address = %url, "Connected to redis"))
            .map_err(|e| ModuleError::connect(NAME, format!("{e:#}")))
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        if self.conn.is_none() {
            self.connect()?;
            tracing::info!("Reconnected to redis");
        }
        let conn = self.conn.as_mut().context("redis connection missing")?;

        let info: String = match ::redis::cmd("INFO").query(conn) {
            Ok(info) => info,
            Err(e) => {
                // Drop the connection so the next poll starts fresh
                self.conn = None;
                return Err(anyhow::Error::new(e).context("redis INFO failed"));
            }
        };

        let now = Utc::now();
        let metrics = parse_info(&info)
            .into_iter()
            .map(|(name, value)| Metric::at(name, value, now))
            .collect();
        Ok(MetricBatch::with_metrics(NAME, metrics))
    }

    fn teardown(&mut self) -> Result<()> {
        self.conn = None;
        Ok(())
    }
}
