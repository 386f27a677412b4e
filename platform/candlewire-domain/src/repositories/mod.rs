//! Ports consumed by the pipeline; adapters live in the infrastructure crate.

pub mod broker;
pub mod market_data;
pub mod oracle;
pub mod storage;

pub use broker::{AccountSnapshot, BrokerClient, OrderAck};
pub use market_data::MarketDataClient;
pub use oracle::{DecisionOracle, OracleContext};
pub use storage::{CandleRepository, DecisionRepository, EventSink, StrategyRepository};

use std::fmt;

/// Failure classes for calls that leave the process.
///
/// Only the transient classes are eligible for retry; validation and
/// rejection surface straight to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    Timeout(String),
    Network(String),
    CircuitOpen(String),
    Validation(String),
    Rejected(String),
    Parse(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Network(_) | ClientError::CircuitOpen(_)
        )
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout(msg) => write!(f, "timeout: {msg}"),
            ClientError::Network(msg) => write!(f, "network: {msg}"),
            ClientError::CircuitOpen(msg) => write!(f, "circuit open: {msg}"),
            ClientError::Validation(msg) => write!(f, "validation: {msg}"),
            ClientError::Rejected(msg) => write!(f, "rejected: {msg}"),
            ClientError::Parse(msg) => write!(f, "parse: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_failures_are_transient() {
        assert!(ClientError::Timeout("t".into()).is_transient());
        assert!(ClientError::Network("n".into()).is_transient());
        assert!(ClientError::CircuitOpen("c".into()).is_transient());
        assert!(!ClientError::Validation("v".into()).is_transient());
        assert!(!ClientError::Rejected("r".into()).is_transient());
        assert!(!ClientError::Parse("p".into()).is_transient());
    }

    #[test]
    fn display_prefixes_the_class() {
        let err = ClientError::CircuitOpen("Broker unavailable".into());
        assert_eq!(err.to_string(), "circuit open: Broker unavailable");
    }
}
