//! Runtime configuration
//!
//! Everything the loader and the consumer need is passed in explicitly from
//! here; nothing is read from process-wide state. A JSON file can supply any
//! subset of fields, and command-line flags override it.

use crate::{address::Ipv6Style, decoder::Framing, sink::SinkType};
use retransmit_common::constants::{
    DEFAULT_MAP_NAME, DEFAULT_PROGRAM_NAME, TRACEPOINT_CATEGORY, TRACEPOINT_NAME,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Kernel-to-user transport used by the probe's output map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// BPF_MAP_TYPE_PERF_EVENT_ARRAY
    #[default]
    Perf,
    /// BPF_MAP_TYPE_RINGBUF
    Ringbuf,
}

impl Transport {
    /// Record framing produced by this transport
    pub fn framing(self) -> Framing {
        match self {
            Self::Perf => Framing::PerfPadded,
            Self::Ringbuf => Framing::Exact,
        }
    }
}

/// Where the probe object lives and how to hook it up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Compiled probe object
    pub object_path: Option<PathBuf>,
    /// Program to attach
    pub program: String,
    pub tracepoint_category: String,
    pub tracepoint_name: String,
    /// Map the probe publishes records on
    pub map: String,
    pub transport: Transport,
    /// Records buffered between perf readers and the consumer
    pub channel_capacity: usize,
    /// Forward aya-log output from the probe (not available with aya 0.12;
    /// requesting it only logs a warning)
    pub ebpf_log: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            object_path: None,
            program: DEFAULT_PROGRAM_NAME.to_string(),
            tracepoint_category: TRACEPOINT_CATEGORY.to_string(),
            tracepoint_name: TRACEPOINT_NAME.to_string(),
            map: DEFAULT_MAP_NAME.to_string(),
            transport: Transport::default(),
            channel_capacity: 1024,
            ebpf_log: false,
        }
    }
}

/// Read loop behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Forward dropped-record diagnostics to the sink
    pub diagnostics: bool,
    /// Progress log interval in seconds (0 = off)
    pub progress_interval_secs: u64,
    pub ipv6_style: Ipv6Style,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            progress_interval_secs: 10,
            ipv6_style: Ipv6Style::default(),
        }
    }
}

impl SessionConfig {
    pub fn progress_interval(&self) -> Option<Duration> {
        (self.progress_interval_secs > 0).then(|| Duration::from_secs(self.progress_interval_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: SinkType,
    /// Output file (stdout when unset)
    pub path: Option<PathBuf>,
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
    /// Run time in seconds (0 = until interrupted)
    pub duration_secs: u64,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.object_path.is_none() {
            return Err(ConfigError::Invalid(
                "no probe object given, use --ebpf-object or probe.object_path".to_string(),
            ));
        }
        for (field, value) in [
            ("probe.program", &self.probe.program),
            ("probe.tracepoint_category", &self.probe.tracepoint_category),
            ("probe.tracepoint_name", &self.probe.tracepoint_name),
            ("probe.map", &self.probe.map),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }
        if self.probe.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "probe.channel_capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.probe.program, "tcp_retransmit_skb");
        assert_eq!(config.probe.tracepoint_category, "tcp");
        assert_eq!(config.probe.tracepoint_name, "tcp_retransmit_skb");
        assert_eq!(config.probe.map, "tcp_retransmit_events");
        assert_eq!(config.probe.transport, Transport::Perf);
        assert_eq!(config.session.ipv6_style, Ipv6Style::Full);
        assert_eq!(config.output.format, SinkType::Text);
        assert_eq!(config.duration(), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json_str(
            r#"{
                "probe": { "object_path": "/opt/retrans.o", "map": "events", "transport": "ringbuf" },
                "session": { "diagnostics": true, "ipv6_style": "compressed" },
                "output": { "format": "json" },
                "duration_secs": 30
            }"#,
        )
        .unwrap();

        assert_eq!(config.probe.object_path, Some(PathBuf::from("/opt/retrans.o")));
        assert_eq!(config.probe.map, "events");
        assert_eq!(config.probe.program, "tcp_retransmit_skb");
        assert_eq!(config.probe.transport, Transport::Ringbuf);
        assert!(config.session.diagnostics);
        assert_eq!(config.session.progress_interval_secs, 10);
        assert_eq!(config.session.ipv6_style, Ipv6Style::Compressed);
        assert_eq!(config.output.format, SinkType::Json);
        assert_eq!(config.duration(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_framing() {
        assert_eq!(Transport::Perf.framing(), Framing::PerfPadded);
        assert_eq!(Transport::Ringbuf.framing(), Framing::Exact);
    }

    #[test]
    fn test_validate_requires_object() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("no probe object"));
    }

    #[test]
    fn test_validate_rejects_empty_map() {
        let mut config = Config::default();
        config.probe.object_path = Some(PathBuf::from("probe.o"));
        config.probe.map.clear();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("probe.map"));
    }

    #[test]
    fn test_progress_interval_off() {
        let session = SessionConfig {
            progress_interval_secs: 0,
            ..SessionConfig::default()
        };
        assert_eq!(session.progress_interval(), None);
    }

    #[test]
    fn test_ebpf_log_request_is_not_fatal() {
        let config = Config::from_json_str(
            r#"{ "probe": { "object_path": "probe.o", "ebpf_log": true } }"#,
        )
        .unwrap();

        assert!(config.probe.ebpf_log);
        assert!(config.validate().is_ok());
        assert!(crate::loader::EBPF_LOG_UNSUPPORTED.contains("aya 0.12"));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            Config::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
