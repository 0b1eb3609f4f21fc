// Host key trust store (append-only)

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::Path;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::output::errors::TidewayError;

/// Process-wide append guard: concurrent host workers trusting new keys
/// serialize their single-line appends.
static APPEND_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Decision procedure for previously unseen host keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Fail the connection
    Reject,
    /// Trust and record the key without asking
    AcceptNew,
    /// Prompt the operator with the fingerprint
    Ask,
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(HostKeyPolicy::Reject),
            "accept-new" | "accept_new" => Ok(HostKeyPolicy::AcceptNew),
            "ask" => Ok(HostKeyPolicy::Ask),
            _ => Err(format!(
                "unknown host key policy: {} (expected reject, accept-new or ask)",
                s
            )),
        }
    }
}

/// Result of looking a host key up in the trust store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// Host present with a matching key
    Known,
    /// Host not present
    Unknown,
    /// Host present with a DIFFERENT key
    Mismatch,
}

/// OpenSSH-style SHA256 fingerprint of a raw host key
pub fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// Base64 encoding of a raw host key as stored in known_hosts
pub fn encode_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

/// Look up a host/keytype pair in a known_hosts file
///
/// Marker lines (`@cert-authority`, `@revoked`), comments and blanks are
/// skipped, never interpreted.
pub fn check(path: &Path, host: &str, keytype: &str, key_b64: &str) -> Result<KeyCheck, TidewayError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KeyCheck::Unknown),
        Err(e) => {
            return Err(TidewayError::Io {
                message: format!("failed to read known_hosts: {}", e),
                path: Some(path.to_path_buf()),
            })
        }
    };

    let mut found_for_host = false;

    for line in io::BufReader::new(file).lines() {
        let line = line.map_err(|e| TidewayError::Io {
            message: format!("failed to read known_hosts: {}", e),
            path: Some(path.to_path_buf()),
        })?;

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (hosts, line_keytype, line_key) = match (fields.next(), fields.next(), fields.next()) {
            (Some(h), Some(t), Some(k)) => (h, t, k),
            _ => continue,
        };

        if line_keytype != keytype {
            continue;
        }
        if !hosts.split(',').any(|h| h == host) {
            continue;
        }

        if line_key == key_b64 {
            return Ok(KeyCheck::Known);
        }
        found_for_host = true;
    }

    if found_for_host {
        Ok(KeyCheck::Mismatch)
    } else {
        Ok(KeyCheck::Unknown)
    }
}

/// Append one trust entry to a known_hosts file
///
/// Strict end-of-file append of a single `"<host> <keytype> <base64-key>\n"`
/// line. Existing bytes, comments included, are never rewritten or removed.
pub fn append_entry(
    path: &Path,
    host: &str,
    keytype: &str,
    key_b64: &str,
) -> Result<(), TidewayError> {
    let _guard = APPEND_LOCK.lock();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TidewayError::Io {
            message: format!("failed to create {}: {}", parent.display(), e),
            path: Some(parent.to_path_buf()),
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TidewayError::Io {
            message: format!("failed to open known_hosts for append: {}", e),
            path: Some(path.to_path_buf()),
        })?;

    file.write_all(format!("{} {} {}\n", host, keytype, key_b64).as_bytes())
        .map_err(|e| TidewayError::Io {
            message: format!("failed to append to known_hosts: {}", e),
            path: Some(path.to_path_buf()),
        })?;

    Ok(())
}

/// Prompt the operator to trust an unknown key. Reads a y/n answer from stdin.
pub fn ask_confirm(host: &str, keytype: &str, fingerprint: &str) -> io::Result<bool> {
    eprintln!(
        "The authenticity of host '{}' can't be established.",
        host
    );
    eprintln!("{} key fingerprint is {}.", keytype, fingerprint);
    eprint!("Are you sure you want to continue connecting (yes/no)? ");
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;

    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const EXAMPLE_KEY: &str = "AAAAB3NzaC1yc2EAAAADAQABAAABgQCj7ndNxQowgcQnjshcLrqP";

    fn example_store(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("known_hosts");
        fs::write(
            &path,
            format!(
                "\
# this is an important comment

# another comment after the newline

@cert-authority example-domain.lan ssh-rsa {key}

192.168.1.222 ssh-rsa {key}
",
                key = EXAMPLE_KEY
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_check_known_unknown_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = example_store(&dir);

        assert_eq!(
            check(&path, "192.168.1.222", "ssh-rsa", EXAMPLE_KEY).unwrap(),
            KeyCheck::Known
        );
        assert_eq!(
            check(&path, "new_host", "ssh-rsa", EXAMPLE_KEY).unwrap(),
            KeyCheck::Unknown
        );
        assert_eq!(
            check(&path, "192.168.1.222", "ssh-rsa", "AAAAdifferent").unwrap(),
            KeyCheck::Mismatch
        );

        // Missing file means nothing is trusted yet
        assert_eq!(
            check(&dir.path().join("absent"), "h", "ssh-rsa", EXAMPLE_KEY).unwrap(),
            KeyCheck::Unknown
        );
    }

    #[test]
    fn test_append_preserves_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = example_store(&dir);

        let before = fs::read_to_string(&path).unwrap();
        let line_count = before.lines().count();

        append_entry(&path, "new_host", "ecdsa-sha2-nistp256", "AAAAE2VjZHNh").unwrap();

        let after = fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before), "existing bytes were rewritten");
        assert_eq!(after.lines().count(), line_count + 1);
        assert!(after.ends_with("new_host ecdsa-sha2-nistp256 AAAAE2VjZHNh\n"));

        assert_eq!(
            check(&path, "new_host", "ecdsa-sha2-nistp256", "AAAAE2VjZHNh").unwrap(),
            KeyCheck::Known
        );
    }

    #[test]
    fn test_append_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh").join("known_hosts");

        append_entry(&path, "host", "ssh-ed25519", "AAAAkey").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "host ssh-ed25519 AAAAkey\n");
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"some-raw-key-material");
        assert!(fp.starts_with("SHA256:"));
        // SHA256 digests are 32 bytes, 43 base64 chars unpadded
        assert_eq!(fp.len(), "SHA256:".len() + 43);
        assert!(!fp.ends_with('='));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "accept-new".parse::<HostKeyPolicy>().unwrap(),
            HostKeyPolicy::AcceptNew
        );
        assert_eq!("ask".parse::<HostKeyPolicy>().unwrap(), HostKeyPolicy::Ask);
        assert!("nope".parse::<HostKeyPolicy>().is_err());
    }
}
