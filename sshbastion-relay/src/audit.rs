use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::config::GlobalConfig;

enum Sink {
    Udp(UdpSocket, String),
    Tcp(Mutex<TcpStream>),
    None,
}

/// The remote authentication log: a line-oriented sink matching the
/// original `WriteAuthLog` helper. Lines are prefixed with the configured
/// facility label and sent to `global.log_host` over `global.log_network`,
/// or emitted through the process's own structured log when no remote
/// host is configured.
pub struct AuditLog {
    facility: String,
    tx: mpsc::UnboundedSender<String>,
}

impl AuditLog {
    pub async fn connect(config: &GlobalConfig) -> anyhow::Result<Arc<Self>> {
        let sink = match &config.log_host {
            Some(host) if config.log_network == "tcp" => {
                let stream = TcpStream::connect(host).await?;
                Sink::Tcp(Mutex::new(stream))
            }
            Some(host) => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(host).await?;
                Sink::Udp(socket, host.clone())
            }
            None => Sink::None,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut sink = sink;
            while let Some(line) = rx.recv().await {
                match &mut sink {
                    Sink::Udp(socket, _) => {
                        if let Err(error) = socket.send(line.as_bytes()).await {
                            warn!(%error, "failed to forward audit log line");
                        }
                    }
                    Sink::Tcp(stream) => {
                        let mut stream = stream.lock().await;
                        if let Err(error) = stream.write_all(line.as_bytes()).await {
                            warn!(%error, "failed to forward audit log line");
                        }
                    }
                    Sink::None => {
                        tracing::info!(target: "audit", "{}", line);
                    }
                }
            }
        });

        Ok(Arc::new(Self {
            facility: config.log_facility.clone(),
            tx,
        }))
    }

    fn send(&self, message: String) {
        let line = format!("{}: {}\n", self.facility, message);
        let _ = self.tx.send(line);
    }

    pub fn connected(&self, user: &str, remote_addr: &str, actual_host: &str) {
        self.send(format!(
            "auth-success user={user} remote={remote_addr} host={actual_host}"
        ));
    }

    pub fn disconnected(&self, user: &str, actual_host: &str) {
        self.send(format!("auth-disconnect user={user} host={actual_host}"));
    }

    pub fn host_key_validation_failed(&self, user: &str, actual_host: &str) {
        self.send(format!(
            "host_key_validation_failed user={user} host={actual_host}"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_log_host_falls_back_to_tracing() {
        let config = GlobalConfig {
            listen_path: "0.0.0.0:2222".into(),
            pass_password: false,
            motd_path: None,
            log_host: None,
            log_network: "udp".into(),
            log_facility: "ssh-bastion".into(),
            recordings_path: "./data/recordings".into(),
            host_key_paths: vec!["./host_key".into()],
        };
        let audit = AuditLog::connect(&config).await.unwrap();
        audit.connected("alice", "10.0.0.5:5555", "db1");
    }
}
