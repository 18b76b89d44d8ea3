//! Per-channel connection state machine.
//!
//! [`ChannelMachine`] holds `{state, delay, generation}` for one channel and
//! exposes pure transition functions. The socket driver calls them at each
//! lifecycle step and acts on the result, which keeps backoff and
//! cancellation testable without a socket.
//!
//! ```text
//! CLOSED ──begin_open──▶ CONNECTING ──on_open──▶ OPEN
//!    ▲                      │                     │
//!    │◀─────on_close────────┴─────────────────────┘
//!    └──on_retry (timer)──▶ CONNECTING …
//! teardown: any ──▶ CLOSED, generation bumped, retries disabled
//! ```

use std::fmt;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Connectivity of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// A connect attempt is in flight.
    Connecting,
    /// The socket is open and usable.
    Open,
    /// No socket; a reconnect may be pending.
    Closed,
}

impl ChannelState {
    /// Returns `true` for `Connecting` and `Open`.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Doubling delay bounded by a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `config.initial`.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            current: config.initial.min(config.max),
        }
    }

    /// Delay the next reconnect would wait.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Returns the current delay and doubles it for next time, capped.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Restores the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

/// What the driver must do after a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Sleep for `delay`, then call [`ChannelMachine::on_retry`].
    Reconnect {
        /// Backoff delay before the next attempt.
        delay: Duration,
        /// Whether the channel was open before this close.
        was_open: bool,
    },
    /// The close belongs to a generation that no longer exists; the driver
    /// must exit without touching shared state.
    Stale,
}

/// State, backoff, and generation for one channel.
///
/// The generation identifies one `begin_open` session. `teardown` bumps it,
/// so every callback still holding the old value is rejected.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    backoff: Backoff,
    generation: u64,
    torn_down: bool,
}

impl ChannelMachine {
    /// Creates a closed machine.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            state: ChannelState::Closed,
            backoff: Backoff::new(config),
            generation: 0,
            torn_down: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Delay the next reconnect would wait.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Returns `true` if `generation` is the live session.
    #[must_use]
    pub const fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.torn_down
    }

    /// Starts a new session. Returns `None` while `Connecting` or `Open`,
    /// otherwise moves to `Connecting` and returns the new generation.
    ///
    /// A session started while a reconnect timer is pending supersedes it.
    pub fn begin_open(&mut self) -> Option<u64> {
        if self.state.is_live() {
            return None;
        }
        self.generation = self.generation.wrapping_add(1);
        self.torn_down = false;
        self.state = ChannelState::Connecting;
        Some(self.generation)
    }

    /// Connection established. Returns `false` for a stale generation, in
    /// which case the caller must drop the connection.
    pub fn on_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state != ChannelState::Connecting {
            return false;
        }
        self.state = ChannelState::Open;
        self.backoff.reset();
        true
    }

    /// Connection closed or failed to open. Schedules the next attempt
    /// with the current delay and doubles the delay for the one after.
    pub fn on_close(&mut self, generation: u64) -> CloseOutcome {
        if !self.is_current(generation) || self.state == ChannelState::Closed {
            return CloseOutcome::Stale;
        }
        let was_open = self.state == ChannelState::Open;
        self.state = ChannelState::Closed;
        CloseOutcome::Reconnect {
            delay: self.backoff.advance(),
            was_open,
        }
    }

    /// Reconnect timer fired. Returns `true` if the attempt should run,
    /// moving to `Connecting`.
    pub fn on_retry(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state != ChannelState::Closed {
            return false;
        }
        self.state = ChannelState::Connecting;
        true
    }

    /// Deliberate shutdown. Invalidates the current generation, forces
    /// `Closed`, and restores the initial delay. Returns the state before
    /// the call. Idempotent.
    pub fn teardown(&mut self) -> ChannelState {
        let previous = self.state;
        if !self.torn_down {
            self.generation = self.generation.wrapping_add(1);
            self.torn_down = true;
        }
        self.state = ChannelState::Closed;
        self.backoff.reset();
        previous
    }
}
