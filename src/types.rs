// =============================================================================
// Shared types used across the trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle of the venue connection.  Trading is refused unless `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authorizing,
    Ready,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authorizing => write!(f, "Authorizing"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Output of the signal generator.  Derived on every evaluation; only the
/// latest per instrument is kept, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    None,
}

impl Signal {
    /// Contract direction to submit for this signal, if any.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Buy => Some(Direction::Call),
            Self::Sell => Some(Direction::Put),
            Self::None => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// Contract direction on the venue: CALL profits on a rise, PUT on a fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade lifecycle status.
///
/// ```text
/// Pending ──> Confirmed ──> Won | Lost
///    └──────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Won,
    Lost,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Won | Self::Lost | Self::Failed)
    }

    /// Whether `self -> next` is a legal step of the state machine.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Failed)
                | (Self::Confirmed, Self::Won)
                | (Self::Confirmed, Self::Lost)
        )
    }

    /// Value written to the `result` column of the trade log.
    pub fn log_label(self) -> &'static str {
        match self {
            Self::Pending | Self::Confirmed => "PENDING",
            Self::Won => "WIN",
            Self::Lost => "LOSS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Won => write!(f, "Won"),
            Self::Lost => write!(f, "Lost"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_only() {
        use TradeStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Confirmed.can_transition_to(Won));
        assert!(Confirmed.can_transition_to(Lost));

        assert!(!Pending.can_transition_to(Won));
        assert!(!Pending.can_transition_to(Lost));
        assert!(!Confirmed.can_transition_to(Failed));
        for terminal in [Won, Lost, Failed] {
            for next in [Pending, Confirmed, Won, Lost, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn signal_maps_to_contract_direction() {
        assert_eq!(Signal::Buy.direction(), Some(Direction::Call));
        assert_eq!(Signal::Sell.direction(), Some(Direction::Put));
        assert_eq!(Signal::None.direction(), None);
    }
}
