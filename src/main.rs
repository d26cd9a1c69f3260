use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv6Addr, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;
use tcp6_trace::probe::get_local_addr;
use tcp6_trace::trace::{self, Correlator};
use tcp6_trace::{Config, ProbeMode, Trace, TraceError};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .with_target(false)
        .init();

    let dest_ip = resolve_target(&args.target)
        .with_context(|| format!("Failed to resolve target: {}", args.target))?;

    let base = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut config = args.apply(base, dest_ip);

    if config.mode == ProbeMode::Syn && config.src_ip.is_unspecified() {
        config.src_ip = get_local_addr(dest_ip)
            .context("No local IPv6 address routes to the target; pass --source")?;
    }

    let max_hops = config.max_hops;
    let mode = config.mode;
    let (trace, queues) = Trace::new(config);
    let collector = tokio::spawn(Correlator::new().collect(queues));

    // Setup Ctrl+C handler
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    // `run` owns the last Trace handle, so the queues close when it returns
    let result = trace::run(trace, cancel).await;
    if let Err(e) = result {
        if let Some(err @ TraceError::Permission { .. }) = e.downcast_ref::<TraceError>() {
            eprintln!("{}", err);
            std::process::exit(1);
        }
        return Err(e);
    }

    let correlator = collector.await?;
    print_results(&correlator, mode, max_hops);
    Ok(())
}

/// Resolve a literal or hostname to an IPv6 destination
fn resolve_target(target: &str) -> Result<Ipv6Addr> {
    // Try parsing as IP address first
    if let Ok(ip) = target.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return match ip {
            IpAddr::V6(v6) => Ok(v6),
            IpAddr::V4(_) => anyhow::bail!("{} is not an IPv6 address", ip),
        };
    }

    // Resolve hostname
    format!("{}:0", target)
        .to_socket_addrs()?
        .find_map(|s| match s.ip() {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        })
        .context("No IPv6 addresses found for hostname")
}

fn print_results(correlator: &Correlator, mode: ProbeMode, max_hops: u8) {
    let hops = correlator.by_hop();

    if mode == ProbeMode::Connect {
        for (_, replies) in &hops {
            for reply in replies {
                println!(
                    "{:>3}  {:<39}  {:>9.3} ms  {:?}",
                    "-",
                    reply.responder,
                    reply.rtt.as_secs_f64() * 1000.0,
                    reply.kind
                );
            }
        }
        println!("{} of {} handshakes completed", correlator.replies().len(), max_hops);
        return;
    }

    for ttl in 1..=max_hops {
        match hops.iter().find(|(t, _)| *t == ttl) {
            Some((_, replies)) => {
                for reply in replies {
                    println!(
                        "{:>3}  {:<39}  {:>9.3} ms  {:?}",
                        ttl,
                        reply.responder,
                        reply.rtt.as_secs_f64() * 1000.0,
                        reply.kind
                    );
                }
                if replies.iter().any(|r| r.kind.is_destination()) {
                    break;
                }
            }
            None => println!("{:>3}  *", ttl),
        }
    }
}
