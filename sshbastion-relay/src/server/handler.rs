use bytes::Bytes;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, ChannelOpenFailure, Pty, Sig};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::common::ChannelEvent;
use crate::secret::Secret;

/// Permission extensions stashed on the connection by authentication —
/// out of scope to implement here, but the relay engine still needs a
/// concrete place to read a cached password from (§4.4, scenario 5).
#[derive(Debug, Clone, Default)]
pub struct ConnectionPermissions {
    pub cached_password: Option<Secret<String>>,
}

/// Everything the session coordinator needs to start running once the
/// first `session` channel is accepted: the channel itself, a handle back
/// into the protocol driver for writes, and the principal/permissions
/// captured by authentication before the channel was opened.
pub struct ReadyHandoff {
    pub channel: Channel<Msg>,
    pub handle: Handle,
    pub user: String,
    pub permissions: ConnectionPermissions,
}

/// Translates `russh::server::Handler` callbacks into `ChannelEvent`s on an
/// unbounded channel, so the protocol-facing task driven by `russh` never
/// blocks on session logic (selection prompts, back-end dials, audit
/// writes). One `ServerHandler` exists per inbound SSH connection.
pub struct ServerHandler {
    pub user: Option<String>,
    pub peer_addr: Option<std::net::SocketAddr>,
    pub permissions: ConnectionPermissions,
    pub events_tx: mpsc::UnboundedSender<ChannelEvent>,
    ready_tx: Option<oneshot::Sender<ReadyHandoff>>,
    session_channel_accepted: bool,
}

impl ServerHandler {
    pub fn new(
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        ready_tx: oneshot::Sender<ReadyHandoff>,
    ) -> Self {
        Self {
            user: None,
            peer_addr: None,
            permissions: ConnectionPermissions::default(),
            events_tx,
            ready_tx: Some(ready_tx),
            session_channel_accepted: false,
        }
    }
}

impl russh::server::Handler for ServerHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        // Authentication is an out-of-scope external collaborator; any
        // credentials are accepted here so the relay engine below this
        // point can be exercised. A real deployment wires in its own
        // authentication layer ahead of this handler.
        self.user = Some(user.to_owned());
        self.permissions.cached_password = Some(Secret::new(password.to_owned()));
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.user = Some(user.to_owned());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.session_channel_accepted {
            debug!(channel = %channel.id(), "rejecting additional channel: remote server denied channel request");
            session.channel_open_failure(
                channel.id(),
                ChannelOpenFailure::AdministrativelyProhibited,
                "remote server denied channel request",
                "en-US",
            )?;
            return Ok(false);
        }
        self.session_channel_accepted = true;

        if let Some(ready_tx) = self.ready_tx.take() {
            let handoff = ReadyHandoff {
                channel,
                handle: session.handle(),
                user: self.user.clone().unwrap_or_default(),
                permissions: self.permissions.clone(),
            };
            if ready_tx.send(handoff).is_err() {
                debug!("session coordinator task went away before channel was ready");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::AgentForward { channel });
        // The request is answered locally by the session coordinator once
        // it drains this event; russh waits for our return value only to
        // decide whether to emit a failure reply on our behalf when this
        // method errors.
        Ok(true)
    }

    /// Replies success immediately — PuTTY and other clients won't send
    /// further input until pty-req is acknowledged — then forwards the
    /// request onward so the back-end session actually gets a PTY.
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let _ = self.events_tx.send(ChannelEvent::PtyRequest {
            channel,
            term: term.to_owned(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes: modes.to_vec(),
        });
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let _ = self.events_tx.send(ChannelEvent::Shell { channel });
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::Env {
            channel,
            name: name.to_owned(),
            value: value.to_owned(),
        });
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::WindowChange {
            channel,
            col_width,
            row_height,
            pix_width,
            pix_height,
        });
        Ok(())
    }

    /// Unlike pty-req/shell, exec's reply must reflect what the back-end
    /// actually says, so this blocks on the relay resolving `reply` before
    /// answering the client — mirrors `session.channel_success`/`_failure`
    /// use elsewhere in this codebase family for requests with a real
    /// outcome to report.
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        let (reply, rx) = oneshot::channel();
        let _ = self.events_tx.send(ChannelEvent::Exec { channel, command, reply });
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (reply, rx) = oneshot::channel();
        let _ = self.events_tx.send(ChannelEvent::Subsystem {
            channel,
            name: name.to_owned(),
            reply,
        });
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, _session: &mut Session) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::Signal { channel, signal });
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::Data {
            channel,
            data: Bytes::from(data.to_vec()),
        });
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::Eof { channel });
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        let _ = self.events_tx.send(ChannelEvent::Close { channel });
        Ok(())
    }
}
