use clap::Parser;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use tcp6_trace::probe::MIN_ICMPV6_ERROR_LEN;
use tcp6_trace::{Config, ProbeMode};

/// IPv6 TCP SYN traceroute
#[derive(Parser, Debug, Clone)]
#[command(name = "tcp6-trace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host (IPv6 address or hostname with an AAAA record)
    pub target: String,

    /// Destination TCP port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Maximum hop limit
    #[arg(short = 'm', long = "max-hops")]
    pub max_hops: Option<u8>,

    /// Probes per hop limit
    #[arg(short = 'q', long = "queries")]
    pub queries: Option<u16>,

    /// Probes per 200ms window
    #[arg(short = 'r', long = "rate")]
    pub rate: Option<u32>,

    /// Offset added to the random source port
    #[arg(long = "port-offset")]
    pub port_offset: Option<u16>,

    /// Source address (default: address the kernel routes the target from)
    #[arg(short = 's', long = "source")]
    pub source: Option<Ipv6Addr>,

    /// Seed for source port selection
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Use full TCP handshakes instead of raw SYN probes
    #[arg(long = "connect")]
    pub connect: bool,

    /// Receive buffer size in bytes
    #[arg(long = "mtu")]
    pub mtu: Option<usize>,

    /// Seconds to keep listening after the last probe
    #[arg(long = "linger")]
    pub linger: Option<f64>,

    /// Connect-mode timeout in seconds
    #[arg(long = "connect-timeout")]
    pub connect_timeout: Option<f64>,

    /// Let the kernel compute the TCP checksum
    #[arg(long = "kernel-checksum")]
    pub kernel_checksum: bool,

    /// Load defaults from a TOML config file
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.rate == Some(0) {
            return Err("Rate must be positive".into());
        }
        if self.max_hops == Some(0) {
            return Err("Max hops must be at least 1".into());
        }
        if self.queries == Some(0) {
            return Err("Queries must be at least 1".into());
        }
        if let Some(mtu) = self.mtu
            && mtu < MIN_ICMPV6_ERROR_LEN
        {
            return Err(format!("MTU must be at least {} bytes", MIN_ICMPV6_ERROR_LEN));
        }
        if let Some(linger) = self.linger
            && Duration::try_from_secs_f64(linger).is_err()
        {
            return Err("Linger must be a non-negative number of seconds".into());
        }
        if let Some(timeout) = self.connect_timeout
            && !Duration::try_from_secs_f64(timeout).is_ok_and(|t| !t.is_zero())
        {
            return Err("Connect timeout must be positive".into());
        }
        Ok(())
    }

    /// Overlay the command line on `base` (file config or defaults)
    pub fn apply(&self, mut base: Config, dest_ip: Ipv6Addr) -> Config {
        base.dest_ip = dest_ip;
        if let Some(port) = self.port {
            base.dest_port = port;
        }
        if let Some(max_hops) = self.max_hops {
            base.max_hops = max_hops;
        }
        if let Some(queries) = self.queries {
            base.traces_per_hop = queries;
        }
        if let Some(rate) = self.rate {
            base.packet_rate = rate;
        }
        if let Some(offset) = self.port_offset {
            base.port_offset = offset;
        }
        if let Some(source) = self.source {
            base.src_ip = source;
        }
        if self.seed.is_some() {
            base.seed = self.seed;
        }
        if let Some(mtu) = self.mtu {
            base.mtu = mtu;
        }
        if let Some(linger) = self.linger {
            base.linger = Duration::from_secs_f64(linger);
        }
        if let Some(timeout) = self.connect_timeout {
            base.connect_timeout = Duration::from_secs_f64(timeout);
        }
        if self.kernel_checksum {
            base.kernel_checksum = true;
        }
        if self.connect {
            base.mode = ProbeMode::Connect;
        }
        base
    }

    /// Default log filter for the verbosity flag
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
