//! Published coordinates of a live session daemon.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the shared connection-authentication secret in bytes.
pub const AUTHKEY_LEN: usize = 32;

/// The 32-byte secret a daemon requires from every connecting bridge.
///
/// Stored on disk URL-safe base64 encoded; unique per daemon lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey([u8; AUTHKEY_LEN]);

impl AuthKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AUTHKEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AUTHKEY_LEN] {
        &self.0
    }

    /// URL-safe base64 form for the on-disk info file.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Decode the on-disk form. Returns `None` for anything that is not
    /// exactly a 32-byte key.
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let decoded = URL_SAFE.decode(encoded).ok()?;
        let bytes: [u8; AUTHKEY_LEN] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }
}

// Never leak key material through debug output.
impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// One `workers/<name>.json` record: where a session daemon listens and how
/// to authenticate to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCoordinates {
    /// Session name, unique per user.
    pub name: String,
    /// OS process id of the daemon.
    pub pid: u32,
    /// Loopback listening interface.
    pub host: String,
    /// Listening port; nonzero once published.
    pub port: u16,
    /// URL-safe base64 of the connection authentication key.
    pub authkey_b64: String,
    /// Unix timestamp (seconds) at publication.
    pub started_at: f64,
}

impl SessionCoordinates {
    /// Build the record a daemon publishes after binding its listener.
    pub fn new(name: &str, host: &str, port: u16, authkey: &AuthKey) -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            name: name.to_string(),
            pid: std::process::id(),
            host: host.to_string(),
            port,
            authkey_b64: authkey.to_base64(),
            started_at,
        }
    }

    /// Decode the embedded authkey. `None` when the stored form is mangled.
    pub fn authkey(&self) -> Option<AuthKey> {
        AuthKey::from_base64(&self.authkey_b64)
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionCoordinates {
        SessionCoordinates::new("default", "127.0.0.1", 49152, &AuthKey::generate())
    }

    #[test]
    fn authkey_roundtrips_through_base64() {
        let key = AuthKey::generate();
        let decoded = AuthKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn authkeys_are_unique() {
        assert_ne!(AuthKey::generate().as_bytes(), AuthKey::generate().as_bytes());
    }

    #[test]
    fn authkey_rejects_wrong_length() {
        assert!(AuthKey::from_base64("c2hvcnQ=").is_none());
        assert!(AuthKey::from_base64("not base64 at all!").is_none());
        assert!(AuthKey::from_base64("").is_none());
    }

    #[test]
    fn authkey_debug_hides_material() {
        let key = AuthKey::generate();
        assert_eq!(format!("{key:?}"), "AuthKey(..)");
    }

    #[test]
    fn coordinates_roundtrip() {
        let coords = sample();
        let parsed = SessionCoordinates::from_json(&coords.to_json().unwrap()).unwrap();
        assert_eq!(parsed, coords);
    }

    #[test]
    fn coordinates_carry_this_process_pid() {
        let coords = sample();
        assert_eq!(coords.pid, std::process::id());
        assert!(coords.started_at > 0.0);
    }

    #[test]
    fn coordinates_embed_decodable_authkey() {
        let key = AuthKey::generate();
        let coords = SessionCoordinates::new("s1", "127.0.0.1", 1, &key);
        assert_eq!(coords.authkey().unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(SessionCoordinates::from_json("{\"name\":\"x\"}").is_err());
        assert!(SessionCoordinates::from_json("not json").is_err());
    }
}
