use russh::keys::{load_secret_key, PrivateKey};
use tracing::warn;

use crate::config::GlobalConfig;

/// Loads every configured host key file, skipping (and logging) any file
/// that fails to read or parse rather than aborting the whole listener —
/// host-key loading itself is an external collaborator (§1), but the
/// relay engine still needs keys to start a listener with at all.
pub fn load_host_keys(config: &GlobalConfig) -> anyhow::Result<Vec<PrivateKey>> {
    let mut keys = Vec::new();
    for path in &config.host_key_paths {
        match load_secret_key(path, None) {
            Ok(key) => keys.push(key),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to load host key");
            }
        }
    }
    if keys.is_empty() {
        anyhow::bail!("no usable host keys found in {:?}", config.host_key_paths);
    }
    Ok(keys)
}
