//! Hijacked session lifecycle states.

/// Lifecycle state of a hijacked session.
///
/// ```text
/// Connecting → Handshaking → Established → Closed
///      │             │
///      └──→ Failed ←─┘
/// ```
///
/// `Failed` is only reachable while the session is being established; an
/// established session ends in `Closed`, whether the caller closed it or the
/// peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Opening the raw connection.
    Connecting,

    /// Upgrade request sent, reading the response head.
    Handshaking,

    /// Connection hijacked; frames flowing.
    Established,

    /// Connection released. Terminal.
    Closed,

    /// Connect or handshake failed. Terminal.
    Failed,
}

impl SessionState {
    /// Check if the session can carry bytes in this state.
    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Connecting, Handshaking)
                | (Connecting, Failed)
                | (Handshaking, Established)
                | (Handshaking, Failed)
                | (Established, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Established => "established",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
