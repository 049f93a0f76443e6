//! In-memory WebSocket transport
//!
//! [`ChannelSocket`] is a `Stream + Sink` of tungstenite messages backed by a
//! pair of channels. The HTTP layer bridges real sockets onto it, and tests
//! drive sessions through it directly.

use futures::channel::mpsc;
use futures::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Session side of an in-memory socket
#[derive(Debug)]
pub struct ChannelSocket {
    incoming: mpsc::Receiver<Message>,
    outgoing: mpsc::Sender<Message>,
}

/// Client side of an in-memory socket
#[derive(Debug)]
pub struct ClientEnd {
    /// Frames sent to the session
    pub tx: mpsc::Sender<Message>,
    /// Frames written by the session
    pub rx: mpsc::Receiver<Message>,
}

impl ChannelSocket {
    /// Create a connected socket pair with `buffer` slots in each direction
    pub fn pair(buffer: usize) -> (ChannelSocket, ClientEnd) {
        let (client_tx, incoming) = mpsc::channel(buffer);
        let (outgoing, client_rx) = mpsc::channel(buffer);
        (
            ChannelSocket { incoming, outgoing },
            ClientEnd {
                tx: client_tx,
                rx: client_rx,
            },
        )
    }
}

fn closed(_: mpsc::SendError) -> WsError {
    WsError::ConnectionClosed
}

impl Stream for ChannelSocket {
    type Item = Result<Message, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.incoming).poll_next(cx).map(|msg| msg.map(Ok))
    }
}

impl Sink<Message> for ChannelSocket {
    type Error = WsError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.outgoing.poll_ready(cx).map_err(closed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.outgoing.start_send(item).map_err(closed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_flush(cx).map_err(closed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_close(cx).map_err(closed)
    }
}
