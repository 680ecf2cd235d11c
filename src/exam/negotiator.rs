//! Per-transport negotiation state machine.
//!
//! A transport moves `created -> connecting -> connected -> closed`; producers
//! may only attach while it is `connected`. The handlers in `server.rs` drive
//! the engine; this module owns the legal transitions so an out-of-order or
//! duplicated client message can never corrupt negotiation state.

use serde::{Deserialize, Serialize};

use crate::error::{ExamError, Result};
use crate::media::{MediaKind, TransportDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Created,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Transport {
    pub id: String,
    pub direction: TransportDirection,
    pub state: TransportState,
}

/// What a `connectTransport` request should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDisposition {
    /// Drive the engine connect.
    Proceed,
    /// Already connected (or a connect is in flight); reply success, no engine call.
    AlreadyConnected,
}

impl Transport {
    pub fn new(id: String, direction: TransportDirection) -> Self {
        Self {
            id,
            direction,
            state: TransportState::Created,
        }
    }

    pub fn begin_connect(&mut self) -> Result<ConnectDisposition> {
        match self.state {
            TransportState::Created => {
                self.state = TransportState::Connecting;
                Ok(ConnectDisposition::Proceed)
            }
            TransportState::Connecting | TransportState::Connected => {
                Ok(ConnectDisposition::AlreadyConnected)
            }
            TransportState::Closed => Err(ExamError::TransportNotReady(self.id.clone())),
        }
    }

    pub fn commit_connect(&mut self) {
        if self.state == TransportState::Connecting {
            self.state = TransportState::Connected;
        }
    }

    pub fn fail_connect(&mut self) {
        self.state = TransportState::Closed;
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    pub fn ensure_ready_for_producer(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ExamError::TransportNotReady(self.id.clone()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Producer {
    pub id: String,
    pub transport_id: String,
    pub kind: MediaKind,
}

impl Producer {
    pub fn new(id: String, transport_id: String, kind: MediaKind) -> Self {
        Self {
            id,
            transport_id,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::new("transport_0".to_string(), TransportDirection::Send)
    }

    #[test]
    fn test_connect_from_created() {
        let mut t = transport();
        assert_eq!(t.begin_connect().unwrap(), ConnectDisposition::Proceed);
        assert_eq!(t.state, TransportState::Connecting);
        t.commit_connect();
        assert!(t.is_connected());
    }

    #[test]
    fn test_duplicate_connect_is_noop_success() {
        let mut t = transport();
        t.begin_connect().unwrap();
        t.commit_connect();

        // Retried connect after success must not re-enter the engine
        assert_eq!(
            t.begin_connect().unwrap(),
            ConnectDisposition::AlreadyConnected
        );
        assert!(t.is_connected());
    }

    #[test]
    fn test_connect_while_in_flight_is_noop() {
        let mut t = transport();
        t.begin_connect().unwrap();
        assert_eq!(
            t.begin_connect().unwrap(),
            ConnectDisposition::AlreadyConnected
        );
        assert_eq!(t.state, TransportState::Connecting);
    }

    #[test]
    fn test_connect_after_close_rejected() {
        let mut t = transport();
        t.begin_connect().unwrap();
        t.fail_connect();
        assert!(t.begin_connect().is_err());
    }

    #[test]
    fn test_producer_requires_connected_transport() {
        let mut t = transport();
        assert!(matches!(
            t.ensure_ready_for_producer(),
            Err(ExamError::TransportNotReady(_))
        ));

        t.begin_connect().unwrap();
        assert!(t.ensure_ready_for_producer().is_err());

        t.commit_connect();
        assert!(t.ensure_ready_for_producer().is_ok());
    }

    #[test]
    fn test_failed_connect_closes_transport() {
        let mut t = transport();
        t.begin_connect().unwrap();
        t.fail_connect();
        assert_eq!(t.state, TransportState::Closed);
        assert!(t.ensure_ready_for_producer().is_err());
    }
}
