//! Physical connection abstraction.
//!
//! A [`Connector`] produces a [`Link`]: a boxed sink of outgoing text and a
//! boxed stream of incoming [`Frame`]s. [`WsConnector`] is the
//! tokio-tungstenite implementation; tests plug in in-memory connectors.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::LinkError;

/// One inbound frame, stripped of transport control traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// The peer sent a close frame.
    Close,
}

/// Boxed stream of inbound frames. `Err` items are transport errors.
pub type FrameStream = BoxStream<'static, Result<Frame, LinkError>>;

/// Boxed sink of outbound text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = LinkError> + Send>>;

/// A live physical connection, split into its two halves.
pub struct Link {
    /// Outbound half.
    pub sink: FrameSink,
    /// Inbound half.
    pub stream: FrameStream,
}

impl Link {
    /// Creates a link from its halves.
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// Returns a transient [`LinkError`] (`Connect`, `Rejected`, ...) when
    /// the connection cannot be established.
    async fn connect(&self, url: &Url) -> Result<Link, LinkError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Link, LinkError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .sink_map_err(|e| LinkError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, LinkError>(Message::text(text))));

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(LinkError::Transport(e.to_string()))),
            })
        });

        Ok(Link::new(Box::pin(sink), stream.boxed()))
    }
}
