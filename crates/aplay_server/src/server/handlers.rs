//! Per-connection worker: read loop, frame extraction, dispatch.
//!
//! All decode/dispatch/send work for one connection runs sequentially on
//! this worker, so no two Shared Field Events from the same peer are ever
//! processed concurrently. The worker blocks only on socket reads (with a
//! bounded timeout) and on the explicit delays the state machine schedules
//! through background tasks.

use crate::codec::envelope::{decode_core_envelope, decode_shared_field_event, SharedFieldEvent};
use crate::connection::{ConnHandle, ConnState};
use crate::error::ServerError;
use crate::server::core::Engine;
use crate::{career, metagame_ops, mission, session, wire};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Whether the connection stays open after handling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Drives one accepted socket to completion.
pub async fn handle_connection(engine: Arc<Engine>, socket: TcpStream, peer: SocketAddr) {
    let (mut reader, writer) = socket.into_split();
    let handle = ConnHandle::new(
        peer,
        engine.config.server_id,
        writer,
        Arc::clone(&engine.sequencer),
        Arc::clone(&engine.dedup),
    );
    let mut state = ConnState::new();
    let mut shutdown = engine.shutdown_signal();
    let read_timeout = Duration::from_secs(engine.config.receive_timeout_secs.max(1));
    let mut chunk = [0u8; 4096];
    let mut probe_checked = false;

    loop {
        let read = tokio::select! {
            read = tokio::time::timeout(read_timeout, reader.read(&mut chunk)) => read,
            _ = shutdown.recv() => {
                debug!("Shutdown requested; closing connection to {}", peer);
                break;
            }
        };
        let n = match read {
            Err(_) => continue, // receive timeout; keep waiting
            Ok(Ok(0)) => {
                debug!("EOF from {}", peer);
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Read error from {}: {}", peer, e);
                break;
            }
        };

        let bytes = &chunk[..n];
        if !probe_checked {
            probe_checked = true;
            if state.frames.is_empty() && looks_like_http_probe(bytes) {
                answer_http_probe(&engine, &handle).await;
                break;
            }
        }

        state.frames.extend(bytes);
        match drain_frames(&engine, &handle, &mut state).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                warn!("Connection to {} failed: {}", peer, e);
                break;
            }
        }
    }

    state.teardown_session();
    handle.release();
    info!("👋 Connection to {} closed", peer);
}

/// Processes every complete frame currently buffered.
async fn drain_frames(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<Flow, ServerError> {
    while let Some(payload) = state.frames.extract_frame() {
        if payload.is_empty() {
            continue;
        }
        if !state.latches.hello_seen {
            if payload.starts_with(wire::HELLO_PREFIX) {
                session::handle_hello(handle, state).await?;
                continue;
            }
            trace!("Pre-hello frame from {} ignored ({} bytes)", handle.peer(), payload.len());
            continue;
        }

        let envelope = match decode_core_envelope(&payload) {
            Some(envelope) => envelope,
            None => {
                debug!("Undecodable envelope from {} ({} bytes)", handle.peer(), payload.len());
                continue;
            }
        };
        handle.observe_client_msg_no(envelope.msg_no);
        let event = match decode_shared_field_event(&envelope.raw) {
            Some(event) => event,
            None => {
                debug!("Undecodable field event from {}", handle.peer());
                continue;
            }
        };
        trace!(
            "<- {} kind={} entity={} field={} msg_no={} ({} data bytes)",
            handle.peer(),
            event.kind,
            event.entity_id,
            event.field_id,
            envelope.msg_no,
            event.data.len()
        );
        if dispatch(engine, handle, state, &event).await? == Flow::Close {
            return Ok(Flow::Close);
        }
    }
    Ok(Flow::Continue)
}

/// Routes one decoded event to the state machine.
async fn dispatch(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<Flow, ServerError> {
    match (event.entity_id, event.field_id) {
        (wire::entity::ACCOUNT_CONNECTION, wire::account_connection::REGULAR_CONNECT) => {
            session::handle_regular_connect(engine, handle, state, event).await
        }
        (wire::entity::ACCOUNT_CONNECTION, wire::account_connection::KEEP_ALIVE) => {
            trace!("KeepAlive from {}", handle.peer());
            Ok(Flow::Continue)
        }
        (wire::entity::ACCOUNT, wire::account::ENTER_CAREER) => {
            career::handle_career_bootstrap(engine, handle, state, event, false).await
        }
        (wire::entity::ACCOUNT, wire::account::CREATE_CAREER) => {
            career::handle_career_bootstrap(engine, handle, state, event, true).await
        }
        (wire::entity::ACCOUNT, wire::account::LEAVE_CURRENT_CAREER) => {
            career::handle_leave_current_career(handle, state).await?;
            Ok(Flow::Continue)
        }
        (wire::entity::ACCOUNT, wire::account::DEACTIVATE_CAREER) => {
            career::handle_deactivate_career(engine, handle, state, event).await?;
            Ok(Flow::Continue)
        }
        (wire::entity::METAGAMEPLAY, _) => {
            metagame_ops::dispatch(engine, handle, state, event).await?;
            Ok(Flow::Continue)
        }
        (wire::entity::MISSION_COMMAND, _) => {
            mission::dispatch(engine, handle, state, event).await?;
            Ok(Flow::Continue)
        }
        (entity_id, field_id) => {
            debug!(
                "Unhandled event from {}: entity={} field={}",
                handle.peer(),
                entity_id,
                field_id
            );
            Ok(Flow::Continue)
        }
    }
}

/// True when the first bytes on the socket look like an HTTP request line
/// instead of protocol traffic.
fn looks_like_http_probe(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GET ") || bytes.starts_with(b"POST ") || bytes.starts_with(b"HEAD ")
}

/// Answers an HTTP probe with a minimal response and lets the worker close
/// the socket. Probe failures are not worth surfacing.
async fn answer_http_probe(engine: &Arc<Engine>, handle: &Arc<ConnHandle>) {
    let body = engine
        .config
        .probe_reply_address
        .clone()
        .unwrap_or_else(|| "OK".to_string());
    let response = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    debug!("HTTP probe from {}; answering {} bytes", handle.peer(), body.len());
    if let Err(e) = handle.send_raw(response.as_bytes()).await {
        debug!("Probe answer to {} failed: {}", handle.peer(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_detection_matches_http_verbs_only() {
        assert!(looks_like_http_probe(b"GET / HTTP/1.0\r\n"));
        assert!(looks_like_http_probe(b"POST /x HTTP/1.1\r\n"));
        assert!(looks_like_http_probe(b"HEAD / HTTP/1.0\r\n"));
        assert!(!looks_like_http_probe(b"GETTY"));
        assert!(!looks_like_http_probe(b"aplay/1"));
        assert!(!looks_like_http_probe(b""));
    }
}
