//! Websocket side-channels of background operations.
//!
//! A [`ChannelJob`] is built by a resource wrapper from the secrets in an
//! async response. The operation engine connects every job, runs them all
//! next to the completion poll, and signals them to close once the server
//! reports the operation finished.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use protocol::{ChannelRole, ChannelSecret, ChannelSocket, Result};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Receives every message read from an output channel.
pub type OutputHandler = Box<dyn FnMut(Vec<u8>) + Send>;

/// Supplies the messages written to an input channel. The channel closes
/// normally when the stream ends.
pub type InputStream = BoxStream<'static, Vec<u8>>;

// ---------------------------------------------------------------------------
// Channel jobs
// ---------------------------------------------------------------------------

/// What a channel does once connected.
pub enum ChannelKind {
    /// Forward received messages to a handler until the peer closes.
    Reader(OutputHandler),
    /// Send messages from a stream until it ends.
    Writer(InputStream),
    /// Connect, then close straight away.
    Control,
}

impl std::fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reader(_) => "Reader",
            Self::Writer(_) => "Writer",
            Self::Control => "Control",
        })
    }
}

// ---------------------------------------------------------------------------

/// One websocket exchange bound to a background operation.
#[derive(Debug)]
pub struct ChannelJob {
    role: ChannelRole,
    secret: ChannelSecret,
    kind: ChannelKind,
}

impl ChannelJob {
    /// A job forwarding everything received on `role` to `handler`.
    pub fn reader(role: ChannelRole, secret: ChannelSecret, handler: OutputHandler) -> Self {
        Self {
            role,
            secret,
            kind: ChannelKind::Reader(handler),
        }
    }

    /// A job sending every chunk of `input` on `role`.
    pub fn writer(role: ChannelRole, secret: ChannelSecret, input: InputStream) -> Self {
        Self {
            role,
            secret,
            kind: ChannelKind::Writer(input),
        }
    }

    /// The control channel: connected so the server may proceed, then closed.
    pub fn control(secret: ChannelSecret) -> Self {
        Self {
            role: ChannelRole::Control,
            secret,
            kind: ChannelKind::Control,
        }
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn secret(&self) -> &ChannelSecret {
        &self.secret
    }

    /// Exchanges messages on a connected socket until the peer closes, the
    /// job finishes on its own, or `closing` flips to `true`. The socket is
    /// always closed before returning and `open` is decremented exactly once.
    pub(crate) async fn run(
        self,
        mut socket: Box<dyn ChannelSocket>,
        closing: watch::Receiver<bool>,
        open: &AtomicUsize,
    ) -> Result<()> {
        let exchanged = exchange(self.kind, socket.as_mut(), closing).await;
        let closed = socket.close().await;
        open.fetch_sub(1, Ordering::SeqCst);
        debug!(role = %self.role, "channel closed");
        exchanged.and(closed)
    }
}

async fn exchange(
    kind: ChannelKind,
    socket: &mut dyn ChannelSocket,
    mut closing: watch::Receiver<bool>,
) -> Result<()> {
    match kind {
        ChannelKind::Control => Ok(()),

        ChannelKind::Reader(mut handler) => loop {
            tokio::select! {
                biased;
                () = operation_finished(&mut closing) => {
                    let drained = drain(socket, &mut handler)?;
                    debug!(drained, "operation completed; closing reader");
                    return Ok(());
                }
                message = socket.recv() => match message? {
                    Some(data) => {
                        trace!(bytes = data.len(), "received");
                        handler(data);
                    }
                    None => return Ok(()),
                },
            }
        },

        ChannelKind::Writer(mut input) => loop {
            tokio::select! {
                biased;
                () = operation_finished(&mut closing) => {
                    debug!("operation completed; closing writer");
                    return Ok(());
                }
                chunk = input.next() => match chunk {
                    Some(data) => {
                        trace!(bytes = data.len(), "sending");
                        socket.send(data).await?;
                    }
                    // Nothing more to send: normal termination.
                    None => return Ok(()),
                },
            }
        },
    }
}

/// Resolves once the engine signals completion. The watch borrow is released
/// before this returns so the caller's future stays `Send`.
async fn operation_finished(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closed| *closed).await;
}

/// Hands every message the socket can deliver without waiting to `handler`.
/// Output the server sent before completing is never lost to the close.
fn drain(socket: &mut dyn ChannelSocket, handler: &mut OutputHandler) -> Result<usize> {
    let mut drained = 0;
    while let Some(message) = socket.recv().now_or_never() {
        match message? {
            Some(data) => {
                drained += 1;
                handler(data);
            }
            None => break,
        }
    }
    Ok(drained)
}
