pub mod connect;
pub mod engine;
pub mod pending;
pub mod receiver;

pub use connect::*;
pub use engine::*;
pub use pending::*;
pub use receiver::*;

use anyhow::{Context, Result, anyhow};
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ProbeMode;
use crate::probe::{
    DatagramSource, ProbeSink, create_icmpv6_recv_socket, create_tcp_recv_socket,
    create_tcp_send_socket, enable_kernel_checksum,
};
use crate::state::Trace;

/// Counts from a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: u64,
    pub icmp_replies: u64,
    pub tcp_replies: u64,
    pub connected: u64,
}

/// Run a trace to completion in the configured mode.
///
/// Records flow out through the trace's queues; the queues close once this
/// returns and the caller has dropped its own `Trace` clones.
pub async fn run(trace: Trace, cancel: CancellationToken) -> Result<RunSummary> {
    trace.config.validate()?;

    match trace.config.mode {
        ProbeMode::Connect => {
            info!(
                "Connect probing [{}]:{} ({} probes)",
                trace.config.dest_ip, trace.config.dest_port, trace.config.max_hops
            );
            let connected = run_connect_probes(trace, cancel).await?;
            Ok(RunSummary {
                connected,
                ..RunSummary::default()
            })
        }
        ProbeMode::Syn => {
            let config = trace.config.clone();

            // Bind every socket before sending anything: without raw sockets there is no trace
            let send_socket = create_tcp_send_socket(config.src_ip)?;
            if config.kernel_checksum {
                enable_kernel_checksum(&send_socket)
                    .context("Failed to enable kernel TCP checksum")?;
            }
            let icmp_socket = create_icmpv6_recv_socket(config.src_ip)?;
            let tcp_socket = create_tcp_recv_socket(config.src_ip)?;

            info!(
                "SYN tracing [{}]:{} from {} ({} hops, {} probes per hop)",
                config.dest_ip, config.dest_port, config.src_ip, config.max_hops, config.traces_per_hop
            );
            run_syn_with(trace, send_socket, icmp_socket, tcp_socket, cancel).await
        }
    }
}

/// SYN tracing over the given sink and sources.
///
/// Starts exactly two listeners, runs the sender, keeps listening for
/// `linger` after the last probe (or until cancelled), then stops the
/// listeners and waits for them.
pub async fn run_syn_with<S, I, T>(
    trace: Trace,
    sink: S,
    icmp_source: I,
    tcp_source: T,
    cancel: CancellationToken,
) -> Result<RunSummary>
where
    S: ProbeSink,
    I: DatagramSource + Send + 'static,
    T: DatagramSource + Send + 'static,
{
    let config = trace.config.clone();
    let listener_cancel = cancel.child_token();
    // Stops whichever listeners are running if we return early or get dropped
    let _stop_listeners = listener_cancel.clone().drop_guard();

    // The engine picks the source port; listeners only take replies for it
    let icmp_tx = trace.receive_sender();
    let tcp_tx = trace.receive_sender();
    let engine = ProbeEngine::new(trace, sink, cancel.clone());
    let src_port = engine.src_port();

    let icmp = spawn_listener(
        Listener::new(
            ListenerKind::Icmp,
            icmp_source,
            config.dest_ip,
            config.mtu,
            icmp_tx,
            listener_cancel.clone(),
        )
        .with_src_port(src_port),
    )
    .context("Failed to start ICMP listener")?;
    let tcp = spawn_listener(
        Listener::new(
            ListenerKind::Tcp,
            tcp_source,
            config.dest_ip,
            config.mtu,
            tcp_tx,
            listener_cancel.clone(),
        )
        .with_src_port(src_port),
    )
    .context("Failed to start TCP listener")?;

    let sent = engine.run().await;

    // Late replies still count until the linger runs out
    if sent.is_ok() {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(config.linger) => {}
        }
    }
    listener_cancel.cancel();

    let icmp_replies = join_listener(icmp, "ICMP").await?;
    let tcp_replies = join_listener(tcp, "TCP").await?;
    let sent = sent?;

    info!(
        "Trace finished: {} sent, {} ICMP replies, {} TCP replies",
        sent, icmp_replies, tcp_replies
    );
    Ok(RunSummary {
        sent,
        icmp_replies,
        tcp_replies,
        connected: 0,
    })
}

async fn join_listener(handle: JoinHandle<u64>, kind: &str) -> Result<u64> {
    tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow!("{} listener thread panicked", kind))
}
