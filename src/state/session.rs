//! Run context shared by the sender and both listeners.
//!
//! A `Trace` carries the configuration plus the producer halves of the two
//! correlation queues. The consumer halves live in `ProbeQueues`, handed to
//! whoever aggregates results. Both queues are unbounded so the sender and
//! listeners never wait on a slow consumer; they close once every `Trace`
//! clone has been dropped.

use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::probe::{ReceivedProbe, SentProbe};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct Trace {
    pub config: Arc<Config>,
    send_tx: UnboundedSender<SentProbe>,
    receive_tx: UnboundedSender<ReceivedProbe>,
}

/// Consumer side of a trace's send and receive queues
#[derive(Debug)]
pub struct ProbeQueues {
    pub sent: UnboundedReceiver<SentProbe>,
    pub received: UnboundedReceiver<ReceivedProbe>,
}

impl Trace {
    pub fn new(config: Config) -> (Self, ProbeQueues) {
        let (send_tx, sent) = unbounded_channel();
        let (receive_tx, received) = unbounded_channel();
        let trace = Self {
            config: Arc::new(config),
            send_tx,
            receive_tx,
        };
        (trace, ProbeQueues { sent, received })
    }

    /// Queue a send record. A closed queue means nobody is aggregating; the record is dropped.
    pub fn record_sent(&self, probe: SentProbe) {
        let _ = self.send_tx.send(probe);
    }

    /// Queue a receive record
    pub fn record_received(&self, probe: ReceivedProbe) {
        let _ = self.receive_tx.send(probe);
    }

    /// Producer handle for a listener thread
    pub fn receive_sender(&self) -> UnboundedSender<ReceivedProbe> {
        self.receive_tx.clone()
    }
}
