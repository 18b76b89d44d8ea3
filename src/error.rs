//! Link error types with stable logging labels.
//!
//! [`LinkError`] is the central error type of the crate. Constructors and
//! parsers return it directly; the live operations on
//! [`crate::registry::ConnectionManager`] never do. Network-level failures
//! are resolved inside the reconnect loop and only show up in logs, tagged
//! with [`LinkError::kind`].

use crate::domain::ChannelKind;

/// Error enum for configuration, transport, and codec failures.
///
/// # Categories
///
/// | Variants                                     | Category      | Recovery             |
/// |----------------------------------------------|---------------|----------------------|
/// | `InvalidConfig`, `InvalidUrl`, `Runtime`     | Setup         | returned to caller   |
/// | `Connect`, `ConnectTimeout`, `Rejected`, `Transport` | Transient | backoff reconnect |
/// | `NotReady`                                   | Send          | dropped with warning |
/// | `Decode`, `Encode`                           | Codec         | dropped with warning |
/// | `InvalidCommand`                             | Operator input| returned to caller   |
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Configuration values are inconsistent or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An endpoint URL could not be parsed.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No tokio runtime was available to drive the channels.
    #[error("no async runtime available: {0}")]
    Runtime(String),

    /// The connection attempt failed before the socket opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection attempt did not complete in time.
    #[error("connect timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Configured connect timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The server rejected the handshake with an HTTP status.
    #[error("handshake rejected with http status {status}")]
    Rejected {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// Read or write failure on an open socket.
    #[error("transport error: {0}")]
    Transport(String),

    /// A send was attempted while the channel was not open.
    #[error("{channel} channel not ready")]
    NotReady {
        /// Channel that rejected the send.
        channel: ChannelKind,
    },

    /// An inbound message could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Operator input did not describe a command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl LinkError {
    /// Returns a stable label for this variant, used as a logging field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Runtime(_) => "runtime",
            Self::Connect(_) => "connect",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Rejected { .. } => "rejected",
            Self::Transport(_) => "transport",
            Self::NotReady { .. } => "not_ready",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::InvalidCommand(_) => "invalid_command",
        }
    }

    /// Returns `true` for failures the reconnect loop recovers from.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::ConnectTimeout { .. }
                | Self::Rejected { .. }
                | Self::Transport(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            WsError::Url(e) => Self::Connect(e.to_string()),
            WsError::Io(e) => Self::Connect(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}
