use std::io;
use std::net::Ipv6Addr;
use thiserror::Error;

/// Errors that end a trace before any probing can happen
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(
        "insufficient permissions for raw {kind} socket.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo tcp6-trace <target>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep <path to tcp6-trace>"
    )]
    Permission { kind: &'static str },

    #[error("failed to create raw {kind} socket: {source}")]
    Socket {
        kind: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind raw {kind} socket to {addr}: {source}")]
    Bind {
        kind: &'static str,
        addr: Ipv6Addr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TraceError {
    /// Map a socket creation error, singling out missing privileges
    pub(crate) fn from_create(kind: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            TraceError::Permission { kind }
        } else {
            TraceError::Socket { kind, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_classified() {
        let err = TraceError::from_create("TCP", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TraceError::Permission { kind: "TCP" }));
        assert!(err.to_string().contains("cap_net_raw"));
    }

    #[test]
    fn test_other_errors_keep_source() {
        let err = TraceError::from_create("ICMPv6", io::Error::from(io::ErrorKind::AddrNotAvailable));
        assert!(matches!(err, TraceError::Socket { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
