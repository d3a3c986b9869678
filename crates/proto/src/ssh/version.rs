//! Identification string exchange (RFC 4253 Section 4.2).
//!
//! Both sides open the connection with a plaintext line:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The server may send other lines before its identification line. These
//! are skipped. Anything after the identification line's LF already
//! belongs to the binary packet protocol.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::version::Version;
//!
//! let version = Version::new("keel_0.1.0", Some("interactive client"));
//! assert_eq!(version.to_string(), "SSH-2.0-keel_0.1.0 interactive_client");
//!
//! let parsed = Version::parse("SSH-1.99-OpenSSH_3.9p1\r\n").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_3.9p1");
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};

/// Maximum length of an identification line, CR LF included.
pub const MAX_VERSION_LENGTH: usize = 255;

/// Maximum number of lines the server may send before its identification.
pub const MAX_PREAMBLE_LINES: usize = 32;

/// An SSH identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    proto_version: String,
    software_version: String,
    comments: Option<String>,
}

impl Version {
    /// Creates a protocol 2.0 identification.
    ///
    /// Spaces in `comments` are replaced by underscores so the comment
    /// stays a single token.
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments
                .filter(|c| !c.is_empty())
                .map(|c| c.replace(' ', "_")),
        }
    }

    /// Parses an identification line, with or without CR LF.
    ///
    /// # Errors
    ///
    /// - [`KeelError::Protocol`] if the line is too long, contains NUL, or
    ///   is not of the form `SSH-<proto>-<software>`
    /// - [`KeelError::UnsupportedVersion`] if the protocol version is not
    ///   "2.0" or "1.99"
    pub fn parse(line: &str) -> KeelResult<Self> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        if line.len() > MAX_VERSION_LENGTH {
            return Err(KeelError::Protocol(format!(
                "Version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(KeelError::Protocol(
                "Version string contains null byte".to_string(),
            ));
        }

        let Some(rest) = line.strip_prefix("SSH-") else {
            return Err(KeelError::Protocol(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            )));
        };

        let Some((proto_version, rest)) = rest.split_once('-') else {
            return Err(KeelError::Protocol(format!(
                "Invalid version string format: '{}'",
                line
            )));
        };

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(KeelError::UnsupportedVersion(format!(
                "Server speaks protocol '{}', expected '2.0' or '1.99'",
                proto_version
            )));
        }

        let (software_version, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.trim().to_string())),
            None => (rest, None),
        };

        if software_version.is_empty() {
            return Err(KeelError::Protocol(format!(
                "Version string has no software version: '{}'",
                line
            )));
        }

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version: software_version.to_string(),
            comments,
        })
    }

    /// Protocol version ("2.0" or "1.99").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Software version token.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Wire form, CR LF included.
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

/// The server's identification, found in the start of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentification {
    /// Parsed identification.
    pub version: Version,
    /// The line exactly as sent, without CR LF (`V_S`).
    pub line: String,
    /// Bytes of the buffer taken up by the preamble and identification line.
    pub consumed: usize,
}

/// Looks for the server identification line in `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Lines before the one
/// starting with `SSH-` are skipped.
///
/// # Errors
///
/// - [`KeelError::Protocol`] if a line exceeds [`MAX_VERSION_LENGTH`], the
///   preamble exceeds [`MAX_PREAMBLE_LINES`], or the line is not UTF-8
/// - Any error of [`Version::parse`]
pub fn scan_server_identification(buf: &[u8]) -> KeelResult<Option<ServerIdentification>> {
    let mut start = 0;
    let mut skipped = 0;

    while let Some(rel) = buf[start..].iter().position(|&b| b == b'\n') {
        let end = start + rel + 1;
        let raw = &buf[start..end];

        if raw.len() > MAX_VERSION_LENGTH {
            return Err(KeelError::Protocol(format!(
                "Identification line too long: {} bytes (max {})",
                raw.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if raw.starts_with(b"SSH-") {
            let text = std::str::from_utf8(raw).map_err(|_| {
                KeelError::Protocol("Identification line is not valid UTF-8".to_string())
            })?;
            let line = text.trim_end_matches('\n').trim_end_matches('\r');
            let version = Version::parse(line)?;

            return Ok(Some(ServerIdentification {
                version,
                line: line.to_string(),
                consumed: end,
            }));
        }

        skipped += 1;
        if skipped > MAX_PREAMBLE_LINES {
            return Err(KeelError::Protocol(format!(
                "Server sent more than {} lines before its identification",
                MAX_PREAMBLE_LINES
            )));
        }
        start = end;
    }

    if buf.len() - start > MAX_VERSION_LENGTH {
        return Err(KeelError::Protocol(format!(
            "Identification line too long: more than {} bytes without LF",
            MAX_VERSION_LENGTH
        )));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_new() {
        let version = Version::new("keel_0.1.0", None);
        assert_eq!(version.to_string(), "SSH-2.0-keel_0.1.0");
        assert_eq!(version.to_wire(), b"SSH-2.0-keel_0.1.0\r\n".to_vec());
    }

    #[test]
    fn test_version_comments_spaces() {
        let version = Version::new("keel_0.1.0", Some("a b c"));
        assert_eq!(version.comments(), Some("a_b_c"));
        assert_eq!(version.to_string(), "SSH-2.0-keel_0.1.0 a_b_c");

        let version = Version::new("keel_0.1.0", Some(""));
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_parse() {
        let v = Version::parse("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3\r\n").unwrap();
        assert_eq!(v.proto_version(), "2.0");
        assert_eq!(v.software(), "OpenSSH_8.9p1");
        assert_eq!(v.comments(), Some("Ubuntu-3"));

        let v = Version::parse("SSH-1.99-Cisco-1.25").unwrap();
        assert_eq!(v.proto_version(), "1.99");
        assert_eq!(v.software(), "Cisco-1.25");
    }

    #[test]
    fn test_version_parse_unsupported() {
        assert!(matches!(
            Version::parse("SSH-1.5-old"),
            Err(KeelError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!(Version::parse("HTTP/1.1 200 OK").is_err());
        assert!(Version::parse("SSH-2.0").is_err());
        assert!(Version::parse("SSH-2.0-").is_err());
        assert!(Version::parse("SSH-2.0-a\0b").is_err());
        assert!(Version::parse(&format!("SSH-2.0-{}", "x".repeat(300))).is_err());
    }

    #[test]
    fn test_scan_incomplete() {
        assert_eq!(scan_server_identification(b"SSH-2.0-Open").unwrap(), None);
        assert_eq!(scan_server_identification(b"").unwrap(), None);
    }

    #[test]
    fn test_scan_with_preamble_and_trailing_packet() {
        let mut buf = b"Welcome\r\nto the server\r\nSSH-2.0-OpenSSH_3.9p1\r\n".to_vec();
        let id_end = buf.len();
        buf.extend_from_slice(&[0, 0, 1, 4, 7]);

        let id = scan_server_identification(&buf).unwrap().unwrap();
        assert_eq!(id.line, "SSH-2.0-OpenSSH_3.9p1");
        assert_eq!(id.version.software(), "OpenSSH_3.9p1");
        assert_eq!(id.consumed, id_end);
        assert_eq!(&buf[id.consumed..], &[0, 0, 1, 4, 7]);
    }

    #[test]
    fn test_scan_bare_lf() {
        let id = scan_server_identification(b"SSH-2.0-dropbear\n").unwrap().unwrap();
        assert_eq!(id.line, "SSH-2.0-dropbear");
        assert_eq!(id.consumed, 17);
    }

    #[test]
    fn test_scan_too_many_lines() {
        let buf = "noise\r\n".repeat(MAX_PREAMBLE_LINES + 1);
        assert!(scan_server_identification(buf.as_bytes()).is_err());
    }

    #[test]
    fn test_scan_line_too_long() {
        let buf = vec![b'a'; MAX_VERSION_LENGTH + 1];
        assert!(scan_server_identification(&buf).is_err());
    }
}
