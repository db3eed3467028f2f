use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::agent::client::AgentClient;
use russh::keys::PublicKey;
use russh::server::{Handle as ServerHandle, Msg};
use russh::{Channel, ChannelId, CryptoVec};
use tokio::sync::mpsc;
use tracing::warn;

use crate::audit::AuditLog;
use crate::common::ChannelEvent;
use crate::config::Config;
use crate::dialer::{self, AuthOptions, ClientVerifier};
use crate::error::CoordinatorError;
use crate::multiplexer;
use crate::recorder::{self, SessionRecorder};
use crate::secret::Secret;
use crate::selector;
use crate::server::handler::ConnectionPermissions;

const GREETING_TITLE_ESCAPE: &str = "\x1b]0;SSH Bastion Relay Login\x07";

/// Effective identity: the (actual_user, actual_host) pair used for audit
/// tagging, seeded from the authenticated principal and the selected
/// back-end, mutable via `X_USER`/`X_HOST` environment requests received
/// before relay begins.
struct EffectiveIdentity {
    actual_user: String,
    actual_host: String,
}

/// The per-inbound-session-channel state machine: ACCEPT_CHANNEL (handled
/// by the protocol handler before this runs) -> NEGOTIATE_REQUESTS -> GREET
/// -> SELECT -> BIND_AUDIT -> DIAL -> RELAY.
pub struct SessionCoordinator {
    pub config: Arc<Config>,
    pub audit: Arc<AuditLog>,
    pub server_handle: ServerHandle,
    pub channel: Channel<Msg>,
    pub user: String,
    pub peer_addr: Option<SocketAddr>,
    pub permissions: ConnectionPermissions,
    pub start_time: i64,
}

impl SessionCoordinator {
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let channel_id = self.channel.id();
        if let Err(error) = self.run_inner(channel_id, events).await {
            warn!(%error, user = %self.user, "session ended with error");
            let _ = self
                .server_handle
                .data(channel_id, CryptoVec::from(format!("{error}\r\n").into_bytes()))
                .await;
            let _ = self.server_handle.close(channel_id).await;
        }
    }

    async fn run_inner(
        &self,
        channel_id: ChannelId,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Result<(), CoordinatorError> {
        // NEGOTIATE_REQUESTS: drain pty-req/shell/agent-forward/env locally
        // until we reach GREET; everything else is queued for the
        // multiplexer once the back-end exists.
        let mut identity = EffectiveIdentity {
            actual_user: self.user.clone(),
            actual_host: String::new(),
        };
        let mut agent_forwarding = false;
        let mut pending: Vec<ChannelEvent> = Vec::new();

        self.write_greeting(channel_id).await;

        let acl_name = self.config.acl_name_for_user(&self.user);
        let allowed = self
            .config
            .allowed_servers(&acl_name)
            .ok_or(CoordinatorError::AclInvalid)?
            .to_vec();

        let chosen_key = self
            .run_selection(channel_id, &mut events, &allowed, &mut identity, &mut agent_forwarding, &mut pending)
            .await?;

        let server = self
            .config
            .server(&chosen_key)
            .cloned()
            .ok_or(CoordinatorError::ServerNotFound)?;

        // `X_HOST` may already have overridden this during negotiation;
        // otherwise the audit name defaults to the selected server key.
        if identity.actual_host.is_empty() {
            identity.actual_host = chosen_key.clone();
        }

        // BIND_AUDIT
        let path = recorder::transcript_path(
            &self.config.global.recordings_path,
            self.start_time,
            &identity.actual_host,
            &identity.actual_user,
        );
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut recorder = SessionRecorder::open(&path)
            .await
            .map_err(CoordinatorError::AuditBindFailed)?;

        // DIAL
        let remote_addr = self
            .peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        self.write_line(channel_id, &format!("Connecting to {}\r\n", server.connect_path))
            .await;

        let login_user = server.login_user.clone().unwrap_or_else(|| self.user.clone());
        let password = if self.config.global.pass_password {
            self.permissions.cached_password.clone()
        } else {
            self.prompt_password(channel_id, &mut events, &login_user, &server.connect_path)
                .await
        };

        let (agent_identities, agent_client) = if agent_forwarding {
            self.agent_auth_material(&identity).await
        } else {
            (Vec::new(), None)
        };
        let auth = AuthOptions {
            agent_identities,
            agent_client,
            password,
        };
        let verifier = ClientVerifier::new(server.host_pubkey_files.clone());

        let dialed = dialer::dial(&server.connect_path, &login_user, auth, verifier)
            .await
            .map_err(|e| match e {
                crate::dialer::DialError::HostKeyMismatch => {
                    self_host_key_audit(&self.audit, &identity);
                    CoordinatorError::HostKeyMismatch
                }
                other => CoordinatorError::DialFailed(anyhow::anyhow!(other)),
            })?;

        self.audit
            .connected(&identity.actual_user, &remote_addr, &identity.actual_host);

        // RELAY: events queued during negotiation (pty-req, shell, env,
        // window-change, ...) are replayed onto the now-live back-end
        // channel before live forwarding begins.
        multiplexer::relay(
            self.server_handle.clone(),
            channel_id,
            pending,
            events,
            dialed.handle,
            dialed.channel,
            &recorder,
        )
        .await;

        recorder.close();
        self.audit.disconnected(&identity.actual_user, &identity.actual_host);
        Ok(())
    }

    async fn write_greeting(&self, channel_id: ChannelId) {
        let mut banner = String::new();
        banner.push_str(GREETING_TITLE_ESCAPE);
        banner.push_str(&self.config.motd());
        let _ = self
            .server_handle
            .data(channel_id, CryptoVec::from(banner.into_bytes()))
            .await;
    }

    async fn write_line(&self, channel_id: ChannelId, line: &str) {
        let _ = self
            .server_handle
            .data(channel_id, CryptoVec::from(line.as_bytes().to_vec()))
            .await;
    }

    /// Opens an `auth-agent@openssh.com` channel back to the inbound
    /// client and lists the identities it holds, so the dialer can try
    /// public-key-via-agent before falling back to password. Any failure
    /// here (client never forwarded an agent, channel refused, no
    /// identities offered) just yields an empty result — the caller
    /// still has password auth to fall back on.
    async fn agent_auth_material(
        &self,
        identity: &EffectiveIdentity,
    ) -> (Vec<Arc<PublicKey>>, Option<AgentClient<russh::ChannelStream<Msg>>>) {
        let channel = match self.server_handle.channel_open_agent().await {
            Ok(channel) => channel,
            Err(error) => {
                warn!(%error, user = %identity.actual_user, "failed to open forwarded-agent channel");
                return (Vec::new(), None);
            }
        };

        let mut agent = AgentClient::connect(channel.into_stream());
        match agent.request_identities().await {
            Ok(keys) => {
                let identities = keys.into_iter().map(Arc::new).collect();
                (identities, Some(agent))
            }
            Err(error) => {
                warn!(%error, user = %identity.actual_user, "forwarded agent offered no usable identities");
                (Vec::new(), None)
            }
        }
    }

    /// Drains negotiation-relevant events up through the first line of
    /// input, applying the NEGOTIATE_REQUESTS table (§4.1) and then
    /// running the interactive selector.
    async fn run_selection(
        &self,
        channel_id: ChannelId,
        events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        allowed: &[String],
        identity: &mut EffectiveIdentity,
        agent_forwarding: &mut bool,
        pending: &mut Vec<ChannelEvent>,
    ) -> Result<String, CoordinatorError> {
        let mut menu = String::from("Select a server:\r\n");
        for (i, key) in allowed.iter().enumerate() {
            menu.push_str(&format!("{}) {key}\r\n", i + 1));
        }
        self.write_line(channel_id, &menu).await;

        let mut line_buffer = String::new();
        loop {
            let Some(event) = events.recv().await else {
                return Err(CoordinatorError::SelectionFailed);
            };
            match event {
                ChannelEvent::AgentForward { .. } => {
                    *agent_forwarding = true;
                }
                ChannelEvent::Env { channel, name, value } => {
                    if name == "X_USER" {
                        identity.actual_user = value.clone();
                    } else if name == "X_HOST" {
                        identity.actual_host = value.clone();
                    }
                    // the original still forwards env requests downstream
                    // after reading X_USER/X_HOST locally.
                    pending.push(ChannelEvent::Env { channel, name, value });
                }
                ChannelEvent::Data { data, .. } => {
                    let text = String::from_utf8_lossy(&data);
                    line_buffer.push_str(&text);
                    if let Some(pos) = line_buffer.find('\n') {
                        let line = line_buffer[..pos].to_owned();
                        return selector::parse_selection(&line, allowed)
                            .ok_or(CoordinatorError::SelectionFailed);
                    }
                }
                other => pending.push(other),
            }
        }
    }

    async fn prompt_password(
        &self,
        channel_id: ChannelId,
        events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        login_user: &str,
        connect_path: &str,
    ) -> Option<Secret<String>> {
        let host = connect_path.split(':').next().unwrap_or(connect_path);
        self.write_line(channel_id, &format!("{login_user}@{host} password: "))
            .await;

        let mut line_buffer = String::new();
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Data { data, .. } = event {
                line_buffer.push_str(&String::from_utf8_lossy(&data));
                if let Some(pos) = line_buffer.find('\n') {
                    let line = line_buffer[..pos].trim_end_matches('\r').to_owned();
                    return Some(Secret::new(line));
                }
            }
        }
        None
    }
}

fn self_host_key_audit(audit: &AuditLog, identity: &EffectiveIdentity) {
    audit.host_key_validation_failed(&identity.actual_user, &identity.actual_host);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_escape_matches_exact_bytes() {
        assert_eq!(GREETING_TITLE_ESCAPE, "\x1b]0;SSH Bastion Relay Login\x07");
    }
}
