use std::collections::VecDeque;

use russh::client::{Handle as ClientHandle, Msg as ClientMsg};
use russh::server::Handle as ServerHandle;
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::common::ChannelEvent;
use crate::dialer::ClientVerifier;
use crate::recorder::SessionRecorder;

/// Runs the duplex splice between the inbound session channel and the
/// outbound back-end channel. Implements the single-task readiness
/// multiplex over three sources endorsed by the design notes: the inbound
/// event stream (data + requests from the user side), and the outbound
/// channel's own event stream (which already interleaves its data and
/// non-data messages). There is exactly one task owning both channel
/// handles, so the shutdown guard is implicit in control flow: the loop
/// breaks exactly once and both sides are closed immediately after.
///
/// `queued` holds channel events the coordinator buffered during
/// negotiation (pty-req, shell, env, and anything else that arrived
/// before the back-end existed); these are replayed onto the outbound
/// channel before live forwarding begins, so a normal client's pty-req +
/// shell actually reach the back-end instead of being dropped.
pub async fn relay(
    server_handle: ServerHandle,
    inbound_channel_id: ChannelId,
    queued: Vec<ChannelEvent>,
    mut inbound_events: mpsc::UnboundedReceiver<ChannelEvent>,
    client_handle: ClientHandle<ClientVerifier>,
    mut outbound_channel: Channel<ClientMsg>,
    recorder: &SessionRecorder,
) {
    let mut pending_replies: VecDeque<oneshot::Sender<bool>> = VecDeque::new();

    for event in queued {
        if !forward_inbound(&mut outbound_channel, event, recorder, &mut pending_replies).await {
            let _ = client_handle.disconnect(russh::Disconnect::ByApplication, "", "").await;
            let _ = server_handle.close(inbound_channel_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = inbound_events.recv() => {
                let Some(event) = event else {
                    debug!("inbound event stream closed, shutting down relay");
                    break;
                };
                if !forward_inbound(&mut outbound_channel, event, recorder, &mut pending_replies).await {
                    break;
                }
            }
            msg = outbound_channel.wait() => {
                let Some(msg) = msg else {
                    debug!("outbound channel closed, shutting down relay");
                    break;
                };
                if !forward_outbound(&server_handle, inbound_channel_id, msg, recorder, &mut pending_replies).await {
                    break;
                }
            }
        }
    }

    let _ = client_handle.disconnect(russh::Disconnect::ByApplication, "", "").await;
    let _ = server_handle.close(inbound_channel_id).await;
}

/// Returns `false` to signal shutdown.
async fn forward_inbound(
    outbound: &mut Channel<ClientMsg>,
    event: ChannelEvent,
    recorder: &SessionRecorder,
    pending_replies: &mut VecDeque<oneshot::Sender<bool>>,
) -> bool {
    let channel = event.channel();
    match event {
        ChannelEvent::Data { data, .. } => {
            recorder.record_data(&data);
            outbound.data(&data[..]).await.is_ok()
        }
        ChannelEvent::PtyRequest {
            term,
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes,
            ..
        } => {
            recorder.record_request("pty-req", false, term.len());
            outbound
                .request_pty(false, &term, col_width, row_height, pix_width, pix_height, &modes)
                .await
                .is_ok()
        }
        ChannelEvent::Shell { .. } => {
            recorder.record_request("shell", false, 0);
            outbound.request_shell(false).await.is_ok()
        }
        ChannelEvent::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
            ..
        } => outbound
            .window_change(col_width, row_height, pix_width, pix_height)
            .await
            .is_ok(),
        ChannelEvent::Exec { command, reply, .. } => {
            recorder.record_request("exec", true, command.len());
            if outbound.exec(true, command).await.is_ok() {
                pending_replies.push_back(reply);
                true
            } else {
                let _ = reply.send(false);
                false
            }
        }
        ChannelEvent::Subsystem { name, reply, .. } => {
            recorder.record_request("subsystem", true, name.len());
            if outbound.request_subsystem(true, &name).await.is_ok() {
                pending_replies.push_back(reply);
                true
            } else {
                let _ = reply.send(false);
                false
            }
        }
        ChannelEvent::Signal { signal, .. } => outbound.signal(signal).await.is_ok(),
        ChannelEvent::Eof { .. } => outbound.eof().await.is_ok(),
        ChannelEvent::Close { .. } => false,
        ChannelEvent::Env { name, value, .. } => {
            recorder.record_request("env", false, name.len() + value.len());
            outbound.set_env(false, name, value).await.is_ok()
        }
        ChannelEvent::AgentForward { .. } => {
            debug!(%channel, "agent-forward request has no outbound equivalent, not relayed");
            true
        }
    }
}

/// Returns `false` to signal shutdown.
async fn forward_outbound(
    server_handle: &ServerHandle,
    inbound_channel: ChannelId,
    msg: ChannelMsg,
    recorder: &SessionRecorder,
    pending_replies: &mut VecDeque<oneshot::Sender<bool>>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            let bytes: &[u8] = &data;
            recorder.record_data(bytes);
            server_handle
                .data(inbound_channel, CryptoVec::from(bytes.to_vec()))
                .await
                .is_ok()
        }
        ChannelMsg::ExtendedData { data, ext } => {
            let bytes: &[u8] = &data;
            server_handle
                .extended_data(inbound_channel, ext, CryptoVec::from(bytes.to_vec()))
                .await
                .is_ok()
        }
        ChannelMsg::Eof => server_handle.eof(inbound_channel).await.is_ok(),
        ChannelMsg::Close => false,
        ChannelMsg::ExitStatus { exit_status } => {
            server_handle.exit_status_request(inbound_channel, exit_status).await.is_ok()
        }
        ChannelMsg::Success => {
            match pending_replies.pop_front() {
                Some(reply) => {
                    let _ = reply.send(true);
                }
                None => warn!("received unmatched channel-request success from back-end"),
            }
            true
        }
        ChannelMsg::Failure => {
            match pending_replies.pop_front() {
                Some(reply) => {
                    let _ = reply.send(false);
                }
                None => warn!("received unmatched channel-request failure from back-end"),
            }
            true
        }
        ChannelMsg::WindowAdjusted { .. } => true,
        other => {
            debug!(?other, "unhandled outbound channel message");
            true
        }
    }
}
