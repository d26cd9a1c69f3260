pub mod config;
pub mod error;
pub mod probe;
pub mod state;
pub mod trace;

pub use config::{Config, ProbeMode};
pub use error::TraceError;
pub use state::{ProbeQueues, ReceivedProbe, ResponseKind, SentProbe, Trace};
