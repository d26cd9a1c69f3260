use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::TraceError;
use crate::probe::MIN_ICMPV6_ERROR_LEN;

/// How the destination is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Raw TCP SYN probes with increasing hop limits
    #[default]
    Syn,
    /// Full TCP handshakes, no hop limit stepping (no raw sockets needed)
    Connect,
}

/// Configuration for one trace run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local address probes are sent from (also used for the checksum)
    pub src_ip: Ipv6Addr,
    /// Trace destination
    pub dest_ip: Ipv6Addr,
    /// Destination TCP port
    pub dest_port: u16,
    /// Highest hop limit probed
    pub max_hops: u8,
    /// Probes sent at each hop limit
    pub traces_per_hop: u16,
    /// Probes per 200ms pacing window
    pub packet_rate: u32,
    /// Added to the randomized source port to keep concurrent runs apart
    pub port_offset: u16,
    /// Receive buffer size for listeners
    pub mtu: usize,
    /// Timeout for connect-mode handshakes
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// How long listeners keep running after the last probe is sent
    #[serde(with = "duration_serde")]
    pub linger: Duration,
    /// Seed for source port selection (None = from entropy)
    pub seed: Option<u64>,
    /// Let the kernel fill in the TCP checksum (IPV6_CHECKSUM)
    pub kernel_checksum: bool,
    pub mode: ProbeMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src_ip: Ipv6Addr::UNSPECIFIED,
            dest_ip: Ipv6Addr::UNSPECIFIED,
            dest_port: 80,
            max_hops: 30,
            traces_per_hop: 3,
            packet_rate: 10,
            port_offset: 0,
            mtu: 1500,
            connect_timeout: Duration::from_secs(2),
            linger: Duration::from_secs(3),
            seed: None,
            kernel_checksum: false,
            mode: ProbeMode::Syn,
        }
    }
}

impl Config {
    /// Load a configuration file (TOML). Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Delay between consecutive probes: 200000 / packet_rate microseconds
    pub fn probe_delay(&self) -> Duration {
        Duration::from_micros(200_000 / self.packet_rate.max(1) as u64)
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.dest_ip.is_unspecified() {
            return Err(TraceError::Config("destination address is required".into()));
        }
        if self.max_hops == 0 {
            return Err(TraceError::Config("max hops must be at least 1".into()));
        }
        if self.traces_per_hop == 0 {
            return Err(TraceError::Config("traces per hop must be at least 1".into()));
        }
        if self.packet_rate == 0 {
            return Err(TraceError::Config("packet rate must be positive".into()));
        }
        if self.mtu < MIN_ICMPV6_ERROR_LEN {
            return Err(TraceError::Config(format!(
                "mtu must be at least {} bytes",
                MIN_ICMPV6_ERROR_LEN
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(TraceError::Config("connect timeout must be positive".into()));
        }
        if self.mode == ProbeMode::Syn && self.src_ip.is_unspecified() {
            return Err(TraceError::Config(
                "source address is required for SYN tracing".into(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
