//! Per-connection dispatcher: `New -> Authenticated -> Closed`. One task
//! per accepted socket, reading frames and issuing wire replies; cross-
//! connection effects (peer broadcast, kick) go through the [`Hub`].

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use change_log::Store;
use sync_core::ids::now_ms;
use sync_core::wire::{self, close_code, Frame, Message, PROTOCOL_VERSION};
use sync_transport::server::ServerSocket;
use telemetry::SyncMetrics;
use tokio::sync::mpsc;

use crate::hub::{Hub, HubPush};
use auth::Auth;

/// Shared, read-only context every connection's dispatcher needs.
pub struct ServerContext {
    /// The change-log/blob/meta store.
    pub store: Store,
    /// This server's persistent identifier.
    pub server_id: String,
    /// The connection registry used for broadcast and kick.
    pub hub: Hub,
    /// In-process activity counters.
    pub metrics: SyncMetrics,
}

struct PendingUpload {
    file_id: String,
    encrypted_meta: String,
    mtime: i64,
    size: u64,
}

/// Run one accepted connection to completion. Never panics on malformed
/// client input; every error path closes the socket with the protocol's
/// documented close code.
pub async fn handle_connection(mut socket: ServerSocket, peer_ip: IpAddr, ctx: Arc<ServerContext>) {
    let auth = Auth::new(&ctx.store);
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<HubPush>();

    let mut client_id: Option<String> = None;
    let mut device_name: Option<String> = None;
    let mut pending_upload: Option<PendingUpload> = None;

    let connected_at = now_ms();
    let timeout = Duration::from_secs(wire::AUTH_TIMEOUT_SECS);

    loop {
        let idle_budget = if client_id.is_none() {
            let elapsed_ms = (now_ms() - connected_at).max(0) as u64;
            timeout.saturating_sub(Duration::from_millis(elapsed_ms))
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            frame = socket.recv() => {
                let Some(frame) = frame else { break };
                match frame {
                    Frame::Text(msg) => {
                        match handle_text(
                            msg,
                            &mut socket,
                            &ctx,
                            &auth,
                            peer_ip,
                            &mut client_id,
                            &mut device_name,
                            &mut pending_upload,
                            &push_tx,
                        )
                        .await
                        {
                            Outcome::Continue => {}
                            Outcome::Close(code, reason) => {
                                socket.close_with_code(code, &reason).await;
                                break;
                            }
                        }
                    }
                    Frame::Binary(bytes) => {
                        if client_id.is_none() {
                            socket.close_with_code(close_code::UNAUTHENTICATED_OP, "binary before auth").await;
                            break;
                        }
                        if let Some(upload) = pending_upload.take() {
                            complete_upload(&ctx, client_id.as_deref().unwrap(), upload, bytes, &mut socket).await;
                        }
                        // A binary frame with no pending header is silently discarded.
                    }
                }
            }
            push = push_rx.recv() => {
                match push {
                    Some(HubPush::Send(msg)) => {
                        if socket.send_text(&msg).await.is_err() {
                            break;
                        }
                    }
                    Some(HubPush::Kick) => {
                        let _ = socket.send_text(&Message::AuthFail { reason: "Session revoked".to_string() }).await;
                        socket.close_with_code(close_code::KICKED, "kicked").await;
                        break;
                    }
                    Some(HubPush::Reset) => {
                        socket.close_with_code(close_code::SERVER_RESET, "server reset").await;
                        break;
                    }
                    None => break,
                }
            }
            () = tokio::time::sleep(idle_budget), if client_id.is_none() => {
                socket.close_with_code(close_code::AUTH_TIMEOUT, "authentication timeout").await;
                break;
            }
        }
    }

    if let Some(id) = &client_id {
        tracing::info!(client_id = %id, device_name = device_name.as_deref().unwrap_or(""), "connection closed");
        ctx.hub.unregister(id, &push_tx);
        broadcast_client_list(&ctx);
    }
}

enum Outcome {
    Continue,
    Close(u16, String),
}

#[allow(clippy::too_many_arguments)]
async fn handle_text(
    msg: Message,
    socket: &mut ServerSocket,
    ctx: &Arc<ServerContext>,
    auth: &Auth<'_>,
    peer_ip: IpAddr,
    client_id: &mut Option<String>,
    device_name: &mut Option<String>,
    pending_upload: &mut Option<PendingUpload>,
    push_tx: &mpsc::UnboundedSender<HubPush>,
) -> Outcome {
    match msg {
        Message::Auth { client_id: cid, device_name: dname, protocol_version, password_hash, auth_token } => {
            if protocol_version != PROTOCOL_VERSION {
                return Outcome::Close(close_code::PROTOCOL_MISMATCH, "protocol version mismatch".to_string());
            }
            let via_token = if let Some(token) = auth_token.as_deref() {
                Some(auth.validate_token(token, now_ms()).ok().flatten().is_some())
            } else {
                None
            };
            // Token path keeps the caller's existing token and only refreshes
            // its lastUsed/session-history timestamps; password path revokes
            // any prior token and issues a fresh one. A token that was
            // present but didn't validate (expired/revoked/unknown) gets its
            // own reply so the client's stored-token reconnect path
            // (sync-engine's `on_auth_fail`) clears its dead credentials
            // instead of retrying the same token forever.
            let token = if via_token == Some(true) {
                if auth.touch_session(&cid, &dname, now_ms()).is_err() {
                    let _ = socket.send_text(&Message::AuthFail { reason: "internal error".to_string() }).await;
                    return Outcome::Continue;
                }
                auth_token.expect("via_token implies auth_token was Some")
            } else if via_token == Some(false) {
                let _ = socket.send_text(&Message::AuthFail { reason: "Session revoked".to_string() }).await;
                return Outcome::Continue;
            } else if let Some(hash) = password_hash.as_deref() {
                if auth.verify_password(hash, peer_ip, now_ms()).is_err() {
                    let _ = socket.send_text(&Message::AuthFail { reason: "invalid credentials".to_string() }).await;
                    return Outcome::Continue;
                }
                match auth.issue_token(&cid, &dname, peer_ip, now_ms()) {
                    Ok(t) => t,
                    Err(_) => {
                        let _ = socket.send_text(&Message::AuthFail { reason: "internal error".to_string() }).await;
                        return Outcome::Continue;
                    }
                }
            } else {
                let _ = socket.send_text(&Message::AuthFail { reason: "missing credentials".to_string() }).await;
                return Outcome::Continue;
            };
            let vault_salt = ctx.store.get_meta(change_log::meta_key::VAULT_SALT).ok().flatten().unwrap_or_default();
            let reply = Message::AuthOk { server_id: ctx.server_id.clone(), vault_salt, auth_token: token };
            if socket.send_text(&reply).await.is_err() {
                return Outcome::Close(close_code::AUTH_TIMEOUT, "send failed".to_string());
            }
            ctx.hub.register(cid.clone(), push_tx.clone());
            *client_id = Some(cid);
            *device_name = Some(dname);
            broadcast_client_list(ctx);
            Outcome::Continue
        }
        _ if client_id.is_none() => Outcome::Close(close_code::UNAUTHENTICATED_OP, "operation before auth".to_string()),
        Message::SyncRequest { last_sequence } => {
            let response = if last_sequence == 0 {
                match ctx.store.get_manifest() {
                    Ok((entries, current_sequence)) => {
                        Message::SyncResponse { entries, current_sequence, full_sync: true }
                    }
                    Err(err) => {
                        tracing::error!(%err, "get_manifest failed");
                        return Outcome::Continue;
                    }
                }
            } else {
                let entries = match ctx.store.get_changes_since(last_sequence) {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::error!(%err, "get_changes_since failed");
                        return Outcome::Continue;
                    }
                };
                let current_sequence = ctx.store.get_current_sequence().unwrap_or(last_sequence);
                Message::SyncResponse { entries, current_sequence, full_sync: false }
            };
            let _ = socket.send_text(&response).await;
            Outcome::Continue
        }
        Message::FileUpload { file_id, encrypted_meta, mtime, size } => {
            *pending_upload = Some(PendingUpload { file_id, encrypted_meta, mtime, size });
            Outcome::Continue
        }
        Message::FileDownload { file_id } => {
            let meta = match ctx.store.get_file_meta(&file_id) {
                Ok(Some(m)) if !m.deleted => m,
                Ok(_) => {
                    tracing::warn!(file_id, "download requested for missing or tombstoned file");
                    return Outcome::Continue;
                }
                Err(err) => {
                    tracing::error!(%err, "get_file_meta failed");
                    return Outcome::Continue;
                }
            };
            let blob = match ctx.store.get_blob(&file_id) {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!(file_id, %err, "blob missing for live record");
                    return Outcome::Continue;
                }
            };
            let response = Message::FileDownloadResponse {
                file_id,
                encrypted_meta: meta.encrypted_meta,
                mtime: meta.mtime,
                size: meta.size,
            };
            if socket.send_text(&response).await.is_err() {
                return Outcome::Continue;
            }
            ctx.metrics.record_download(meta.size);
            let _ = socket.send_binary(blob).await;
            Outcome::Continue
        }
        Message::FileDelete { file_id } => {
            let sequence = match ctx.store.delete_file(&file_id) {
                Ok(s) => s,
                Err(err) => {
                    tracing::error!(%err, "delete_file failed");
                    return Outcome::Continue;
                }
            };
            ctx.metrics.record_delete();
            let source_client_id = client_id.clone().unwrap_or_default();
            // Broadcast to every connection, including the deleter: the
            // echo back to the sender is this protocol's only delete
            // acknowledgement (there is no distinct FILE_DELETE_ACK).
            ctx.hub.broadcast_all(Message::FileRemoved { file_id, sequence, source_client_id });
            Outcome::Continue
        }
        Message::ClientKick { target_client_id } => {
            if auth.revoke_by_client_id(&target_client_id).is_ok() {
                ctx.hub.push_to(&target_client_id, HubPush::Kick);
            }
            Outcome::Continue
        }
        Message::Ping { timestamp } => {
            let _ = socket.send_text(&Message::Pong { timestamp }).await;
            Outcome::Continue
        }
        Message::Pong { .. } => Outcome::Continue,
        Message::AuthOk { .. }
        | Message::AuthFail { .. }
        | Message::SyncResponse { .. }
        | Message::FileUploadAck { .. }
        | Message::FileDownloadResponse { .. }
        | Message::FileChanged { .. }
        | Message::FileRemoved { .. }
        | Message::ClientList { .. } => {
            // Server-originated variants sent by a client: ignore rather
            // than tear down the connection over a confused peer.
            Outcome::Continue
        }
    }
}

async fn complete_upload(
    ctx: &Arc<ServerContext>,
    client_id: &str,
    upload: PendingUpload,
    blob: Vec<u8>,
    socket: &mut ServerSocket,
) {
    let sequence = match ctx.store.put_file(&upload.file_id, &upload.encrypted_meta, upload.mtime, upload.size, &blob) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "put_file failed");
            return;
        }
    };
    ctx.metrics.record_upload(upload.size);
    let _ = socket.send_text(&Message::FileUploadAck { file_id: upload.file_id.clone(), sequence }).await;
    ctx.hub.broadcast_except(
        client_id,
        Message::FileChanged {
            file_id: upload.file_id,
            encrypted_meta: upload.encrypted_meta,
            mtime: upload.mtime,
            size: upload.size,
            sequence,
            source_client_id: client_id.to_string(),
        },
    );
}

fn broadcast_client_list(ctx: &Arc<ServerContext>) {
    let Ok(sessions) = ctx.store.list_client_sessions() else { return };
    let clients = ctx.hub.client_list(&sessions);
    ctx.hub.broadcast_all(Message::ClientList { clients });
}
