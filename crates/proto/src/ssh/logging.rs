//! Structured logging for session milestones
//!
//! Per-packet and per-step events are logged where they happen with
//! `trace!`/`debug!`. The helpers here cover the handful of milestone events
//! that carry the same fields every time.
//!
//! # Log Levels
//!
//! - **TRACE**: Packet sequence numbers and lengths
//! - **DEBUG**: State transitions, handshake steps
//! - **INFO**: Version exchange, key exchange, login, shell start and end
//! - **WARN**: Retries, rejected input, unverified host signatures
//! - **ERROR**: Fatal errors sent to the peer as DISCONNECT
//!
//! Keys, passwords and the DH private exponent are never passed to these
//! functions.
//!
//! # Example
//!
//! ```no_run
//! use keel_proto::ssh::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("keel_proto=debug")
//!     .init();
//!
//! logging::log_version_exchange("SSH-2.0-keel_0.1.0", "SSH-2.0-OpenSSH_3.9p1");
//! ```

use tracing::{error, info, warn};

/// Log the identification strings of both sides
pub fn log_version_exchange(client: &str, server: &str) {
    info!(client = client, server = server, "version exchange complete");
}

/// Log completion of the key exchange
///
/// # Arguments
///
/// * `fingerprint` - SHA-1 fingerprint of the server host key
/// * `session_id` - Exchange hash of the first key exchange
/// * `signature_valid` - Whether the host signature verified
pub fn log_kex_complete(fingerprint: &str, session_id: &[u8], signature_valid: bool) {
    if signature_valid {
        info!(
            host_key = fingerprint,
            session_id = %hex::encode(session_id),
            "key exchange complete"
        );
    } else {
        warn!(
            host_key = fingerprint,
            session_id = %hex::encode(session_id),
            "key exchange complete with unverified host signature"
        );
    }
}

/// Log a rejected password attempt
pub fn log_auth_failure(username: &str, attempt: u32, max_attempts: u32, methods: &[String]) {
    warn!(
        user = username,
        attempt = attempt,
        max_attempts = max_attempts,
        methods = %methods.join(","),
        "authentication failed"
    );
}

/// Log a successful login
pub fn log_auth_success(username: &str, attempt: u32) {
    info!(user = username, attempt = attempt, "authentication succeeded");
}

/// Log the shell becoming available
pub fn log_shell_open(remote_channel: u32, window: u32, max_packet: u32) {
    info!(
        remote_channel = remote_channel,
        window = window,
        max_packet = max_packet,
        "interactive shell open"
    );
}

/// Log the end of the shell loop
pub fn log_shell_closed(exit_status: Option<u32>, bytes_in: u64, bytes_out: u64) {
    info!(
        exit_status = ?exit_status,
        bytes_in = bytes_in,
        bytes_out = bytes_out,
        "interactive shell closed"
    );
}

/// Log a fatal error that is being reported to the peer
pub fn log_fatal(reason: u32, reason_name: &str, error: &str) {
    error!(
        reason = reason,
        reason_name = reason_name,
        error = error,
        "sending disconnect"
    );
}

/// Log a DISCONNECT received from the peer
pub fn log_peer_disconnect(reason: u32, reason_name: &str, description: &str) {
    warn!(
        reason = reason,
        reason_name = reason_name,
        description = description,
        "peer disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` under a plain-text subscriber and returns what it wrote.
    fn capture(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_version_exchange_fields() {
        let out = capture(|| log_version_exchange("SSH-2.0-keel", "SSH-2.0-OpenSSH_3.9p1"));
        assert!(out.contains("INFO"));
        assert!(out.contains("version exchange complete"));
        assert!(out.contains("SSH-2.0-keel"));
        assert!(out.contains("SSH-2.0-OpenSSH_3.9p1"));
    }

    #[test]
    fn test_kex_complete_level_follows_signature() {
        let verified = capture(|| log_kex_complete("aa:bb", &[0x17; 20], true));
        assert!(verified.contains("INFO"));
        assert!(verified.contains("key exchange complete"));
        assert!(verified.contains(&format!("session_id={}", "17".repeat(20))));
        assert!(!verified.contains("unverified"));

        let unverified = capture(|| log_kex_complete("aa:bb", &[0x17; 20], false));
        assert!(unverified.contains("WARN"));
        assert!(unverified.contains("unverified host signature"));
        assert!(unverified.contains("aa:bb"));
    }

    #[test]
    fn test_auth_events_fields() {
        let methods = ["password".to_string(), "publickey".to_string()];
        let out = capture(|| {
            log_auth_failure("alice", 1, 3, &methods);
            log_auth_success("alice", 2);
        });

        let mut lines = out.lines();
        let failure = lines.next().unwrap();
        assert!(failure.contains("WARN"));
        assert!(failure.contains("authentication failed"));
        assert!(failure.contains("alice"));
        assert!(failure.contains("attempt=1"));
        assert!(failure.contains("max_attempts=3"));
        assert!(failure.contains("methods=password,publickey"));

        let success = lines.next().unwrap();
        assert!(success.contains("INFO"));
        assert!(success.contains("authentication succeeded"));
        assert!(success.contains("attempt=2"));
    }

    #[test]
    fn test_shell_events_fields() {
        let out = capture(|| {
            log_shell_open(42, 2048, 32768);
            log_shell_closed(Some(0), 10, 20);
        });
        assert!(out.contains("interactive shell open"));
        assert!(out.contains("remote_channel=42"));
        assert!(out.contains("window=2048"));
        assert!(out.contains("max_packet=32768"));
        assert!(out.contains("interactive shell closed"));
        assert!(out.contains("exit_status=Some(0)"));
        assert!(out.contains("bytes_in=10"));
        assert!(out.contains("bytes_out=20"));
    }

    #[test]
    fn test_disconnect_events_fields() {
        let fatal = capture(|| log_fatal(2, "PROTOCOL_ERROR", "bad packet"));
        assert!(fatal.contains("ERROR"));
        assert!(fatal.contains("sending disconnect"));
        assert!(fatal.contains("reason=2"));
        assert!(fatal.contains("PROTOCOL_ERROR"));
        assert!(fatal.contains("bad packet"));

        let peer = capture(|| log_peer_disconnect(11, "BY_APPLICATION", "idle timeout"));
        assert!(peer.contains("WARN"));
        assert!(peer.contains("peer disconnected"));
        assert!(peer.contains("reason=11"));
        assert!(peer.contains("idle timeout"));
    }
}
