//! Producer configuration.
//!
//! [`ProducerConfig`] holds every operational parameter of the pipeline. It
//! can be built in code (usually through [`crate::ProducerBuilder`]) or
//! loaded from a TOML file:
//!
//! ```toml
//! client_id = "orders-service"
//! bootstrap_servers = ["kafka-1:9092", "kafka-2:9092"]
//! batch_size = 500
//! linger = "50ms"
//! retries = 5
//! retry_backoff = "200ms"
//! required_acks = -1
//! metadata_expiry = "5m"
//! ```
//!
//! Keys that are absent keep their defaults. Durations are human-readable
//! strings (`"250ms"`, `"1s"`, `"5m"`).
//!
//! Kafka-style dotted names are accepted as aliases and must be quoted in
//! TOML: `"batch.size"`, `"acks"`, `"client.id"`, `"linger"`, `"retries"`,
//! `"retry.backoff"`, `"block.on.buffer.full"`, `"compression.type"`,
//! `"max.requests"`, `"send.routines"`, `"receive.routines"`,
//! `"metadata.max.age"`, and `"bootstrap.servers"` or its older name
//! `"metadata.broker.list"`. Giving a field under two names is an error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::partitioner::PartitionerKind;

/// Acknowledgment level requested for produce requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum RequiredAcks {
    /// Fire-and-forget: a written request counts as delivered.
    None,
    /// The partition leader acknowledges once it has appended the batch.
    Leader,
    /// All in-sync replicas acknowledge.
    All,
}

impl From<RequiredAcks> for i16 {
    fn from(acks: RequiredAcks) -> Self {
        match acks {
            RequiredAcks::None => 0,
            RequiredAcks::Leader => 1,
            RequiredAcks::All => -1,
        }
    }
}

impl TryFrom<i16> for RequiredAcks {
    type Error = String;

    fn try_from(value: i16) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(RequiredAcks::None),
            1 => Ok(RequiredAcks::Leader),
            -1 => Ok(RequiredAcks::All),
            other => Err(format!("unsupported acks value {} (expected 0, 1 or -1)", other)),
        }
    }
}

/// Compression the connector should apply to produce requests.
///
/// The producer only forwards this setting; codecs live in the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

/// Producer configuration containing all operational parameters.
///
/// ## Defaults
///
/// | field | default |
/// |---|---|
/// | `partitioner` | `hash` |
/// | `metadata_expiry` | 1 minute |
/// | `batch_size` | 1000 records |
/// | `max_batch_bytes` | 1 MiB |
/// | `linger` | 1 second |
/// | `retries` / `retry_backoff` | 3 / 100ms |
/// | `block_on_buffer_full` | true |
/// | `client_id` | `"tributary"` |
/// | `max_in_flight_requests` | 10 |
/// | `send_workers` / `receive_workers` | 10 / 10 |
/// | `read_timeout` / `write_timeout` | 5s / 5s |
/// | `ack_timeout` | 1s |
/// | `required_acks` | leader (1) |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfig {
    /// Partition assignment strategy.
    pub partitioner: PartitionerKind,

    /// How long a cached topic's partition list is trusted.
    #[serde(with = "duration_str", alias = "metadata.max.age")]
    pub metadata_expiry: Duration,

    /// Compression setting forwarded to the connector.
    #[serde(alias = "compression.type")]
    pub compression: CompressionType,

    /// Maximum records per batch.
    ///
    /// Also the capacity of the inbound, per-topic and per-partition queues,
    /// so it is the admission-control bound seen by `send`.
    #[serde(alias = "batch.size")]
    pub batch_size: usize,

    /// Maximum encoded bytes per batch.
    ///
    /// A single record larger than this is sent alone.
    pub max_batch_bytes: usize,

    /// Maximum time an open batch waits for more records.
    #[serde(with = "duration_str")]
    pub linger: Duration,

    /// Retry budget for retryable send failures.
    pub retries: usize,

    /// Fixed wait between attempts.
    #[serde(with = "duration_str", alias = "retry.backoff")]
    pub retry_backoff: Duration,

    /// Whether `send` waits for room in a full inbound queue (`true`) or
    /// fails fast with `BufferFull` (`false`).
    #[serde(alias = "block.on.buffer.full")]
    pub block_on_buffer_full: bool,

    /// Opaque identifier sent to brokers.
    #[serde(alias = "client.id")]
    pub client_id: String,

    /// Global bound on concurrently outstanding produce requests.
    #[serde(alias = "max.requests")]
    pub max_in_flight_requests: usize,

    /// Bound on concurrent request writes.
    #[serde(alias = "send.routines")]
    pub send_workers: usize,

    /// Bound on concurrent response reads.
    #[serde(alias = "receive.routines")]
    pub receive_workers: usize,

    /// Deadline for reading a response, excluding the broker ack timeout.
    #[serde(with = "duration_str")]
    pub read_timeout: Duration,

    /// Deadline for writing a request.
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,

    /// Broker-side acknowledgment timeout, sent with each request.
    #[serde(with = "duration_str")]
    pub ack_timeout: Duration,

    /// Acknowledgment level.
    #[serde(alias = "acks")]
    pub required_acks: RequiredAcks,

    /// Bootstrap addresses used to set up the connector.
    #[serde(alias = "bootstrap.servers", alias = "metadata.broker.list")]
    pub bootstrap_servers: Vec<String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            partitioner: PartitionerKind::Hash,
            metadata_expiry: Duration::from_secs(60),
            compression: CompressionType::None,
            batch_size: 1000,
            max_batch_bytes: 1024 * 1024,
            linger: Duration::from_secs(1),
            retries: 3,
            retry_backoff: Duration::from_millis(100),
            block_on_buffer_full: true,
            client_id: "tributary".to_string(),
            max_in_flight_requests: 10,
            send_workers: 10,
            receive_workers: 10,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(1),
            required_acks: RequiredAcks::Leader,
            bootstrap_servers: Vec::new(),
        }
    }
}

impl ProducerConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the file cannot be read, does not parse, or fails
    /// [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ProducerConfig =
            toml::from_str(contents).map_err(|e| ClientError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClientError::ConfigError(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(ClientError::ConfigError(
                "max_batch_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight_requests == 0 {
            return Err(ClientError::ConfigError(
                "max_in_flight_requests must be at least 1".to_string(),
            ));
        }
        if self.send_workers == 0 || self.receive_workers == 0 {
            return Err(ClientError::ConfigError(
                "send_workers and receive_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Deadline for reading a response: `read_timeout + ack_timeout`.
    pub fn response_deadline(&self) -> Duration {
        self.read_timeout + self.ack_timeout
    }

    pub(crate) fn ack_timeout_ms(&self) -> u32 {
        u32::try_from(self.ack_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Serde adapter for human-readable durations.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProducerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.linger, Duration::from_secs(1));
        assert_eq!(config.metadata_expiry, Duration::from_secs(60));
        assert_eq!(config.required_acks, RequiredAcks::Leader);
        assert!(config.block_on_buffer_full);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProducerConfig::from_toml_str(
            r#"
            client_id = "orders"
            linger = "50ms"
            required_acks = -1
            partitioner = "round_robin"
            compression = "lz4"
            "#,
        )
        .unwrap();

        assert_eq!(config.client_id, "orders");
        assert_eq!(config.linger, Duration::from_millis(50));
        assert_eq!(config.required_acks, RequiredAcks::All);
        assert_eq!(config.partitioner, PartitionerKind::RoundRobin);
        assert_eq!(config.compression, CompressionType::Lz4);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn test_bad_duration_is_config_error() {
        let err = ProducerConfig::from_toml_str(r#"linger = "soon""#).unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_bad_acks_is_config_error() {
        let err = ProducerConfig::from_toml_str("required_acks = 2").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let err = ProducerConfig::from_toml_str("batch_sise = 10").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_kafka_style_keys() {
        let config = ProducerConfig::from_toml_str(
            r#"
            "batch.size" = 200
            acks = -1
            "client.id" = "legacy"
            "retry.backoff" = "250ms"
            "block.on.buffer.full" = false
            "compression.type" = "gzip"
            "max.requests" = 4
            "send.routines" = 2
            "receive.routines" = 3
            "metadata.max.age" = "30s"
            "metadata.broker.list" = ["old-broker:9092"]
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 200);
        assert_eq!(config.required_acks, RequiredAcks::All);
        assert_eq!(config.client_id, "legacy");
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert!(!config.block_on_buffer_full);
        assert_eq!(config.compression, CompressionType::Gzip);
        assert_eq!(config.max_in_flight_requests, 4);
        assert_eq!(config.send_workers, 2);
        assert_eq!(config.receive_workers, 3);
        assert_eq!(config.metadata_expiry, Duration::from_secs(30));
        assert_eq!(config.bootstrap_servers, vec!["old-broker:9092".to_string()]);

        let config =
            ProducerConfig::from_toml_str(r#""bootstrap.servers" = ["b1:9092", "b2:9092"]"#)
                .unwrap();
        assert_eq!(config.bootstrap_servers.len(), 2);
    }

    #[test]
    fn test_field_under_two_names_is_config_error() {
        let err = ProducerConfig::from_toml_str(
            r#"
            batch_size = 10
            "batch.size" = 20
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = ProducerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProducerConfig {
            max_in_flight_requests: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProducerConfig {
            receive_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            bootstrap_servers = ["broker-1:9092", "broker-2:9092"]
            batch_size = 250
            retry_backoff = "2s"
            block_on_buffer_full = false
            "#
        )
        .unwrap();

        let config = ProducerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bootstrap_servers.len(), 2);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert!(!config.block_on_buffer_full);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ProducerConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_toml_round_trip_of_durations() {
        let config = ProducerConfig {
            linger: Duration::from_millis(250),
            ..Default::default()
        };
        let rendered = toml::to_string(&config).unwrap();
        let parsed = ProducerConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_response_deadline_adds_ack_timeout() {
        let config = ProducerConfig {
            read_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.response_deadline(), Duration::from_millis(2500));
        assert_eq!(config.ack_timeout_ms(), 500);
    }
}
