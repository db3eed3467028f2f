use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::client::{self, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::PublicKey;
use russh::{Channel, ChannelStream};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::warn;

use crate::host_key_verifier;
use crate::secret::Secret;

#[derive(Error, Debug)]
pub enum DialError {
    #[error("connecting to back-end: {0}")]
    Connect(#[source] anyhow::Error),

    #[error("authentication rejected by back-end")]
    AuthRejected,

    #[error("opening back-end session channel: {0}")]
    ChannelOpen(#[source] anyhow::Error),

    #[error("host key verification failed")]
    HostKeyMismatch,
}

/// The `russh::client::Handler` used for the outbound connection. Delegates
/// host-key checking to the per-connection list of authorised-keys files
/// the session coordinator resolved from the server record. `mismatched`
/// records a verification failure so the caller can distinguish "host key
/// didn't match" from any other connect-time error once `russh` surfaces
/// the rejection as a generic connection failure.
pub struct ClientVerifier {
    pub host_pubkey_files: Vec<PathBuf>,
    mismatched: Arc<AtomicBool>,
}

impl ClientVerifier {
    pub fn new(host_pubkey_files: Vec<PathBuf>) -> Self {
        Self {
            host_pubkey_files,
            mismatched: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl client::Handler for ClientVerifier {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let ok = host_key_verifier::verify(&self.host_pubkey_files, server_public_key);
        if !ok {
            self.mismatched.store(true, Ordering::SeqCst);
        }
        Ok(ok)
    }
}

pub struct DialedSession {
    pub handle: Handle<ClientVerifier>,
    pub channel: Channel<Msg>,
}

/// Authentication material available for the outbound connection, in the
/// order the dialer tries them: agent-relayed public keys first (when
/// agent forwarding was requested), then a password.
///
/// `agent_client` wraps the `auth-agent@openssh.com` channel opened back
/// toward the inbound client as a raw byte stream, so the signing
/// challenges for `agent_identities` are answered by the client's own
/// agent rather than one local to this process.
pub struct AuthOptions {
    pub agent_identities: Vec<Arc<PublicKey>>,
    pub agent_client: Option<AgentClient<ChannelStream<russh::server::Msg>>>,
    pub password: Option<Secret<String>>,
}

/// Dials `connect_path`, authenticates as `user` using `auth`, and opens a
/// `session` channel. Public-key-via-agent is attempted before password,
/// matching the source's `ssh.PublicKeysCallback` preference.
pub async fn dial(
    connect_path: &str,
    user: &str,
    auth: AuthOptions,
    verifier: ClientVerifier,
) -> Result<DialedSession, DialError> {
    let config = Arc::new(client::Config::default());
    let stream = TcpStream::connect(connect_path)
        .await
        .map_err(|e| DialError::Connect(e.into()))?;

    let mismatched = verifier.mismatched.clone();
    let mut handle = client::connect_stream(config, stream, verifier).await.map_err(|e| {
        if mismatched.load(Ordering::SeqCst) {
            DialError::HostKeyMismatch
        } else {
            DialError::Connect(anyhow::anyhow!(e))
        }
    })?;

    let mut authenticated = false;

    if let Some(mut agent) = auth.agent_client {
        for identity in &auth.agent_identities {
            match handle
                .authenticate_publickey_with(user, identity.clone(), None, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    authenticated = true;
                    break;
                }
                Ok(_) => continue,
                Err(error) => {
                    warn!(%error, "agent public-key authentication attempt failed");
                    continue;
                }
            }
        }
    }

    if !authenticated {
        if let Some(password) = &auth.password {
            let result = handle
                .authenticate_password(user, password.expose_secret())
                .await
                .map_err(|e| DialError::Connect(anyhow::anyhow!(e)))?;
            authenticated = result.success();
        }
    }

    if !authenticated {
        return Err(DialError::AuthRejected);
    }

    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| DialError::ChannelOpen(anyhow::anyhow!(e)))?;

    Ok(DialedSession { handle, channel })
}
