use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::probe::{ProbeSink, build_tcp6_syn};
use crate::state::{SentProbe, SequenceCounter, Trace};

/// Lowest source port before offset and randomization
const SRC_PORT_BASE: u16 = 1000;

/// Width of the randomized source port window
const SRC_PORT_SPREAD: u16 = 500;

/// Build the port generator: seeded for reproducible runs, entropy otherwise
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Pick a source port in `1000 + offset .. 1000 + offset + 500`
pub fn pick_source_port<R: Rng>(port_offset: u16, rng: &mut R) -> u16 {
    SRC_PORT_BASE
        .wrapping_add(port_offset)
        .wrapping_add(rng.gen_range(0..SRC_PORT_SPREAD))
}

/// The probe engine sends TCP SYN probes with increasing hop limits
pub struct ProbeEngine<S> {
    trace: Trace,
    sink: S,
    src_port: u16,
    cancel: CancellationToken,
}

impl<S: ProbeSink> ProbeEngine<S> {
    pub fn new(trace: Trace, sink: S, cancel: CancellationToken) -> Self {
        let mut rng = rng_from_seed(trace.config.seed);
        Self::with_rng(trace, sink, cancel, &mut rng)
    }

    /// Create an engine drawing its source port from `rng`
    pub fn with_rng<R: Rng>(trace: Trace, sink: S, cancel: CancellationToken, rng: &mut R) -> Self {
        let src_port = pick_source_port(trace.config.port_offset, rng);
        Self {
            trace,
            sink,
            src_port,
            cancel,
        }
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Send every probe of the run. Returns the number of probes sent.
    ///
    /// Each probe gets a fresh sequence number whether or not its send
    /// succeeds, so ids never collide with a probe that might still be in flight.
    pub async fn run(self) -> Result<u64> {
        let config = self.trace.config.clone();
        let delay = config.probe_delay();
        let mut seq = SequenceCounter::default();
        let mut total_sent: u64 = 0;

        'hops: for ttl in 1..=config.max_hops {
            for _ in 0..config.traces_per_hop {
                if self.cancel.is_cancelled() {
                    break 'hops;
                }

                let id = seq.next_seq();
                let packet = build_tcp6_syn(
                    config.src_ip,
                    config.dest_ip,
                    self.src_port,
                    config.dest_port,
                    ttl,
                    id,
                );

                match self.sink.send_probe(&packet, config.dest_ip) {
                    Ok(_) => {
                        self.trace.record_sent(SentProbe {
                            id,
                            dest: config.dest_ip,
                            ttl,
                            sent_at: Instant::now(),
                        });
                        total_sent += 1;
                    }
                    Err(e) => {
                        warn!("Failed to send TCP probe TTL {} seq {}: {}", ttl, id, e);
                    }
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => break 'hops,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        debug!("Probe engine finished: {} probes sent", total_sent);
        Ok(total_sent)
    }
}
