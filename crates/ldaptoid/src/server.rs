// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TCP acceptor and per-connection I/O loop.
//!
//! Each connection gets a reader task (decode PDUs, drive the
//! [`crate::connection::Connection`] state machine) and a writer task fed
//! over a bounded `mpsc` channel, so a slow client applies backpressure to
//! its own search output instead of the server buffering it unbounded in
//! memory.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ber::message::{encode_message, try_decode_message, DecodeFailure, LdapResult, ResultCode};
use crate::connection::{Connection, Outcome};
use crate::context::AppContext;

/// Outbound PDUs queued per connection before the writer task drains them
/// to the socket. Small: a slow reader should block the connection's own
/// producer, not let it race ahead.
const WRITE_QUEUE_DEPTH: usize = 64;
const READ_CHUNK: usize = 8192;

pub async fn run(ctx: Arc<AppContext>) -> io::Result<()> {
    let addr = SocketAddr::new(ctx.config.ldap_bind_address, ctx.config.ldap_port);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "ldaptoid listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let ctx = ctx.clone();
                ctx.metrics.connection_opened();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(ctx.clone(), stream, peer).await {
                        debug!(%peer, error = %e, "connection closed with error");
                    }
                    ctx.metrics.connection_closed();
                });
            }
            _ = ctx.shutdown.notified() => {
                info!("acceptor loop stopping");
                return Ok(());
            }
        }
    }
}

async fn serve_connection(ctx: Arc<AppContext>, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    debug!(%peer, "connection accepted");
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut conn = Connection::new();

    'read_loop: loop {
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        loop {
            let decoded = try_decode_message(&buf);
            match decoded {
                Ok(None) => break,
                Ok(Some((msg, consumed))) => {
                    buf.drain(..consumed);
                    match conn.handle(&ctx, &msg) {
                        Outcome::Reply(messages) => {
                            for m in messages {
                                if tx.send(encode_message(&m)).await.is_err() {
                                    break 'read_loop;
                                }
                            }
                        }
                        Outcome::ReplyRaw(bytes) => {
                            if tx.send(bytes).await.is_err() {
                                break 'read_loop;
                            }
                        }
                        Outcome::CloseSilently => break 'read_loop,
                    }
                }
                Err(failure) => {
                    send_decode_failure(&tx, failure).await;
                    break 'read_loop;
                }
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    debug!(%peer, "connection closed");
    Ok(())
}

async fn send_decode_failure(tx: &mpsc::Sender<Vec<u8>>, failure: DecodeFailure) {
    warn!(error = %failure.error, "malformed PDU, closing connection");
    if let Some(message_id) = failure.message_id {
        let result = LdapResult::with_message(ResultCode::ProtocolError, failure.error.to_string());
        let bytes = crate::ber::message::encode_generic_error(message_id, &result);
        let _ = tx.send(bytes).await;
    }
}
