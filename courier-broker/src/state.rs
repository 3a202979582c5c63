use std::fmt::{self, Display};

/// Lifecycle of the physical broker connection.
///
/// ```text
/// Disconnected ──▶ Connecting ──▶ Connected
///      ▲                              │
///      └──── close / channel error ───┘
///
/// any ──▶ Closing (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        })
    }
}
