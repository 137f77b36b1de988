//! Per-connection worker.
//!
//! ```text
//! accept ─> greeting ─┬─> read frame ─> decode ─> dispatch ─> encode ─> write ─┐
//!                     └──────────────────────────<─────────────────────────────┘
//! ```
//!
//! The loop ends on logout or any other session-ending result, a framing
//! fault, the idle timeout, or the peer closing the stream. Processing
//! faults are always answered; transport faults just close the socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::state::ServerContext;
use crate::codec::FailedDocument;
use crate::error::Result;
use crate::protocol::{Message, ResultCode};
use crate::session::{Fault, Session};
use crate::transport::{read_frame, write_frame, FrameError};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    SessionEnded(ResultCode),
    FramingFault,
    IdleTimeout,
    PeerClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionEnded(code) => write!(f, "session ended ({})", code.code()),
            Self::FramingFault => write!(f, "framing fault"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::PeerClosed => write!(f, "closed by peer"),
        }
    }
}

/// Serve one accepted connection until it closes.
pub async fn run_connection<S>(ctx: Arc<ServerContext>, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let session = Session::new(ctx.greeting(), ctx.config().idle_timeout);
    tracing::info!(%peer, session = %session.id(), "Connection accepted");

    let mut worker = Worker {
        ctx,
        stream,
        session,
    };
    match worker.run().await {
        Ok(reason) => tracing::info!(
            %peer,
            session = %worker.session.id(),
            commands = worker.session.commands(),
            "Connection closed: {}",
            reason
        ),
        Err(e) => tracing::warn!(
            %peer,
            session = %worker.session.id(),
            commands = worker.session.commands(),
            "Connection fault: {}",
            e
        ),
    }

    if let Err(e) = worker.stream.shutdown().await {
        tracing::debug!(%peer, "Shutdown failed: {}", e);
    }
}

struct Worker<S> {
    ctx: Arc<ServerContext>,
    stream: S,
    session: Session,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> Result<CloseReason> {
        let greeting = Message::Greeting(self.session.greeting().clone());
        self.send(&greeting).await?;
        tracing::debug!(session = %self.session.id(), "Greeting sent");

        let idle = self.ctx.config().idle_timeout;
        let max_frame = self.ctx.config().max_frame_size;

        loop {
            let read = tokio::time::timeout(idle, read_frame(&mut self.stream, max_frame)).await;
            let document = match read {
                Err(_) => return Ok(CloseReason::IdleTimeout),
                Ok(Ok(document)) => document,
                Ok(Err(FrameError::Closed)) => return Ok(CloseReason::PeerClosed),
                Ok(Err(e)) if e.is_interrupted() => {
                    tracing::debug!(session = %self.session.id(), "Read interrupted between frames: {}", e);
                    self.send_fault(Fault::new(ResultCode::CommandFailed), None).await?;
                    continue;
                },
                Ok(Err(e)) if e.is_malformed() => {
                    tracing::warn!(session = %self.session.id(), "Framing fault: {}", e);
                    let fault = Fault::new(ResultCode::CommandFailedClosing).with_reason(e.to_string());
                    self.send_fault(fault, None).await?;
                    return Ok(CloseReason::FramingFault);
                },
                Ok(Err(e)) => return Err(e.into()),
            };

            let decoded = self.ctx.codecs().checkout().await?.decode(&document);
            let dispatcher = self.ctx.dispatcher();
            let reply = match decoded {
                Ok(message) => {
                    tracing::debug!(session = %self.session.id(), kind = message.kind(), "Message received");
                    dispatcher.handle(&mut self.session, &message, self.ctx.poll_queue())
                },
                Err(e) => Message::Response(dispatcher.handle_decode_error(
                    &mut self.session,
                    &e,
                    FailedDocument::inspect(&document),
                )),
            };

            self.send(&reply).await?;

            if let Message::Response(response) = &reply {
                if response.code().ends_session() {
                    return Ok(CloseReason::SessionEnded(response.code()));
                }
            }
        }
    }

    async fn send_fault(&mut self, fault: Fault, client_trans_id: Option<String>) -> Result<()> {
        let response =
            self.ctx
                .dispatcher()
                .fault_response(&mut self.session, &fault, client_trans_id);
        self.send(&Message::Response(response)).await
    }

    /// Encode and write one message. A message that fails to encode is
    /// replaced by a 2400 response carrying the same client transaction id.
    async fn send(&mut self, message: &Message) -> Result<()> {
        let encoded = self.ctx.codecs().checkout().await?.encode(message);
        let document = match encoded {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(session = %self.session.id(), kind = message.kind(), "Encode failed: {}", e);
                let client_trans_id = match message {
                    Message::Response(response) => response.trans_id.client.clone(),
                    _ => None,
                };
                let fallback = self.ctx.dispatcher().fault_response(
                    &mut self.session,
                    &Fault::new(ResultCode::CommandFailed),
                    client_trans_id,
                );
                self.ctx
                    .codecs()
                    .checkout()
                    .await?
                    .encode(&Message::Response(fallback))?
            },
        };

        write_frame(&mut self.stream, &document).await?;
        Ok(())
    }
}
