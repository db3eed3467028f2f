use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_ACL: &str = "DEFAULT";

fn _default_log_network() -> String {
    "udp".to_owned()
}

fn _default_log_facility() -> String {
    "ssh-bastion".to_owned()
}

fn _default_recordings_path() -> PathBuf {
    PathBuf::from("./data/recordings")
}

fn _default_host_key_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("./host_key")]
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    pub listen_path: String,

    #[serde(default)]
    pub pass_password: bool,

    #[serde(default)]
    pub motd_path: Option<PathBuf>,

    #[serde(default)]
    pub log_host: Option<String>,

    #[serde(default = "_default_log_network")]
    pub log_network: String,

    #[serde(default = "_default_log_facility")]
    pub log_facility: String,

    #[serde(default = "_default_recordings_path")]
    pub recordings_path: PathBuf,

    #[serde(default = "_default_host_key_paths")]
    pub host_key_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default)]
    pub acl: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AclConfig {
    #[serde(default)]
    pub allowed_servers: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub connect_path: String,

    #[serde(default)]
    pub login_user: Option<String>,

    #[serde(default)]
    pub host_pubkey_files: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub global: GlobalConfig,

    #[serde(default)]
    pub users: HashMap<String, UserConfig>,

    #[serde(default)]
    pub acls: HashMap<String, AclConfig>,

    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path.display(), e))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Resolves the ACL name for `user`, falling back to `DEFAULT` when the
    /// user has no entry or no explicit ACL assigned.
    pub fn acl_name_for_user(&self, user: &str) -> String {
        self.users
            .get(user)
            .and_then(|u| u.acl.clone())
            .unwrap_or_else(|| DEFAULT_ACL.to_owned())
    }

    /// Returns the list of server keys the named ACL allows, or `None` if
    /// the ACL does not exist at all.
    pub fn allowed_servers(&self, acl_name: &str) -> Option<&[String]> {
        self.acls
            .get(acl_name)
            .map(|acl| acl.allowed_servers.as_slice())
    }

    pub fn server(&self, key: &str) -> Option<&ServerConfig> {
        self.servers.get(key)
    }

    /// Reads the MOTD file, normalising bare `\n` to `\r\n` the way an SSH
    /// terminal expects. Returns an empty string when no MOTD is configured
    /// or the file cannot be read.
    pub fn motd(&self) -> String {
        let Some(path) = &self.global.motd_path else {
            return String::new();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => text.replace('\n', "\r\n"),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_yaml::from_str(
            r#"
global:
  listen_path: "0.0.0.0:2222"
users:
  alice:
    acl: admins
acls:
  admins:
    allowed_servers: ["db1", "web1"]
  DEFAULT:
    allowed_servers: []
servers:
  db1:
    connect_path: "10.0.0.1:22"
    login_user: root
    host_pubkey_files: ["/etc/ssh/db1.pub"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_known_user_acl() {
        let config = sample();
        assert_eq!(config.acl_name_for_user("alice"), "admins");
    }

    #[test]
    fn unknown_user_falls_back_to_default_acl() {
        let config = sample();
        assert_eq!(config.acl_name_for_user("mallory"), "DEFAULT");
    }

    #[test]
    fn missing_acl_is_none() {
        let config = sample();
        assert!(config.allowed_servers("nonexistent").is_none());
    }

    #[test]
    fn known_acl_lists_servers() {
        let config = sample();
        assert_eq!(
            config.allowed_servers("admins"),
            Some(&["db1".to_owned(), "web1".to_owned()][..])
        );
    }

    #[test]
    fn server_lookup() {
        let config = sample();
        let server = config.server("db1").expect("db1 configured");
        assert_eq!(server.login_user.as_deref(), Some("root"));
    }

    #[test]
    fn global_defaults_apply() {
        let config = sample();
        assert!(!config.global.pass_password);
        assert_eq!(config.global.log_network, "udp");
        assert_eq!(config.global.log_facility, "ssh-bastion");
    }
}
