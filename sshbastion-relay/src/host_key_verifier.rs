use std::path::Path;

use russh::keys::{parse_public_key_base64, PublicKey, PublicKeyBase64};
use tracing::warn;

/// Checks `presented` against every authorised-keys-format file in
/// `host_pubkey_files`, comparing by algorithm name and marshalled bytes.
/// The first file that contains a matching entry accepts the key. Files
/// that fail to read or parse are logged and skipped, not treated as a
/// verification failure on their own.
pub fn verify(host_pubkey_files: &[impl AsRef<Path>], presented: &PublicKey) -> bool {
    for path in host_pubkey_files {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(error) => {
                warn!(path = %path.display(), %error, "could not read host key file");
                continue;
            }
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_authorized_key_line(line) {
                Some(candidate) => {
                    if candidate.algorithm() == presented.algorithm()
                        && candidate.public_key_base64() == presented.public_key_base64()
                    {
                        return true;
                    }
                }
                None => {
                    warn!(path = %path.display(), "could not parse host key line");
                }
            }
        }
    }
    false
}

/// Parses a single `authorized_keys`-style line (`<type> <base64> [comment]`)
/// into a `PublicKey`, ignoring the comment field.
fn parse_authorized_key_line(line: &str) -> Option<PublicKey> {
    let mut fields = line.split_whitespace();
    let _key_type = fields.next()?;
    let base64_blob = fields.next()?;
    parse_public_key_base64(base64_blob).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let contents = "\n# a comment\n   \n";
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            panic!("line {line:?} should have been skipped");
        }
    }

    #[test]
    fn malformed_line_fails_to_parse_without_panicking() {
        assert!(parse_authorized_key_line("not-a-valid-key-line").is_none());
        assert!(parse_authorized_key_line("ssh-ed25519").is_none());
    }
}
