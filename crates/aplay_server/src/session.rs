//! Handshake and login handling.
//!
//! Covers the first two phases of a connection's life: the fixed hello
//! exchange and the RegularConnect login. A successful login starts the
//! periodic KeepAlive task; a failed one is the first of the two conditions
//! that intentionally close a connection.

use crate::codec::strings::{decode_utf16_string_list, encode_utf16_string_list};
use crate::connection::{ConnHandle, ConnState};
use crate::error::ServerError;
use crate::server::core::Engine;
use crate::server::handlers::Flow;
use crate::{career, wire};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Answers the fixed hello payload: introduces the account-connection
/// entity and latches the one-shot introduce/initialized events.
pub async fn handle_hello(
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    state.latches.hello_seen = true;
    info!("🤝 Hello from {}", handle.peer());
    handle.introduce_entity(wire::entity::ACCOUNT_CONNECTION).await?;
    handle
        .send_event(
            wire::entity::ACCOUNT_CONNECTION,
            wire::account_connection::INTRODUCE_GAME_CLIENT,
            &[],
        )
        .await?;
    handle
        .send_event(
            wire::entity::ACCOUNT_CONNECTION,
            wire::account_connection::INITIALIZED,
            &[],
        )
        .await?;
    Ok(())
}

/// RegularConnect: resolves the session token to an account identity. An
/// unknown token gets a RejectLogin and the connection is closed; there is
/// no fallback identity.
pub async fn handle_regular_connect(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &crate::codec::envelope::SharedFieldEvent,
) -> Result<Flow, ServerError> {
    if state.latches.logged_in {
        trace!("Repeated RegularConnect from {} ignored", handle.peer());
        return Ok(Flow::Continue);
    }
    let args = decode_utf16_string_list(&event.data);
    let token = args.first().map(String::as_str).unwrap_or("");
    let identity = match engine.services.identity.try_resolve_identity(token) {
        Some(identity) => identity,
        None => {
            warn!("Rejecting login from {}: unknown session token", handle.peer());
            handle
                .send_event(
                    wire::entity::ACCOUNT_CONNECTION,
                    wire::account_connection::REJECT_LOGIN,
                    &[],
                )
                .await?;
            return Ok(Flow::Close);
        }
    };
    info!("🔑 {} logged in as {}", handle.peer(), identity);
    state.identity = Some(identity.clone());
    state.latches.logged_in = true;

    handle.introduce_entity(wire::entity::ACCOUNT).await?;

    let summaries = career::career_summaries_json(engine, &identity);
    handle
        .send_event(
            wire::entity::ACCOUNT_CONNECTION,
            wire::account_connection::WELCOME,
            &encode_utf16_string_list(&[summaries.as_str()]),
        )
        .await?;
    handle
        .send_event(
            wire::entity::ACCOUNT_CONNECTION,
            wire::account_connection::KEEP_ALIVE,
            &[],
        )
        .await?;
    spawn_keepalive_task(engine, handle);
    Ok(Flow::Continue)
}

/// Periodic KeepAlive sender. Self-terminates on shutdown, connection close
/// or the first failed send.
fn spawn_keepalive_task(engine: &Arc<Engine>, handle: &Arc<ConnHandle>) {
    let handle = Arc::clone(handle);
    let mut shutdown = engine.shutdown_signal();
    let interval = Duration::from_millis(engine.config.keepalive_interval_ms.max(100));
    tokio::spawn(async move {
        let mut closed = handle.closed();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => break,
                _ = closed.changed() => break,
            }
            if handle.is_closed() {
                break;
            }
            let sent = handle
                .send_event(
                    wire::entity::ACCOUNT_CONNECTION,
                    wire::account_connection::KEEP_ALIVE,
                    &[],
                )
                .await;
            if let Err(e) = sent {
                debug!("KeepAlive to {} failed; stopping: {}", handle.peer(), e);
                break;
            }
        }
        trace!("KeepAlive task for {} finished", handle.peer());
    });
}
