use core::fmt;

/// Whether the dispatcher is listening to clients.
///
/// The frontend is read only while at least one worker is ready, so requests
/// wait in the transport (not in the broker) until they can be dispatched.
/// Both loop realizations derive their frontend subscription from this value
/// alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No ready worker: the frontend is not polled or subscribed.
    #[default]
    Blocked,
    /// At least one ready worker: the frontend is polled or subscribed.
    Enabled,
}

impl ClientState {
    pub const fn for_ready_workers(ready_workers: usize) -> Self {
        if ready_workers > 0 {
            Self::Enabled
        } else {
            Self::Blocked
        }
    }

    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Moves to the state implied by `ready_workers`.
    ///
    /// Returns the new state when it differs from the old one (a 0→1 or 1→0
    /// edge), and `None` otherwise.
    pub fn advance(&mut self, ready_workers: usize) -> Option<Self> {
        let next = Self::for_ready_workers(ready_workers);
        if next == *self {
            return None;
        }
        *self = next;
        Some(next)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "client-blocked"),
            Self::Enabled => write!(f, "client-enabled"),
        }
    }
}
