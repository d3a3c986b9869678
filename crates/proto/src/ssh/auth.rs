//! Service request and password authentication (RFC 4253 Section 10,
//! RFC 4252).
//!
//! After the keys are active the client asks for the "ssh-userauth"
//! service, then sends password requests for "ssh-connection" until the
//! server accepts one or the attempt budget runs out.
//!
//! # Security
//!
//! - Passwords are held in [`Zeroizing`] buffers and never logged
//! - `Debug` output of a request redacts the password
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::auth::AuthRequest;
//!
//! let request = AuthRequest::password("alice", "secret");
//! let bytes = request.to_bytes();
//! assert_eq!(bytes[0], 50); // SSH_MSG_USERAUTH_REQUEST
//! assert!(!format!("{:?}", request).contains("secret"));
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};
use zeroize::Zeroizing;

use super::message::MessageType;
use super::wire::{WireReader, WireWriter};

/// Service requested before authentication.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Service started after authentication.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// SSH_MSG_SERVICE_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Service name.
    pub service: String,
}

impl ServiceRequest {
    /// Request for "ssh-userauth".
    pub fn userauth() -> Self {
        Self {
            service: USERAUTH_SERVICE.to_string(),
        }
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ServiceRequest);
        w.put_str(&self.service);
        w.finish()
    }

    /// Parses the message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is malformed.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::ServiceRequest)?;
        Ok(Self {
            service: r.read_utf8()?,
        })
    }
}

/// SSH_MSG_SERVICE_ACCEPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    /// Service name.
    pub service: String,
}

impl ServiceAccept {
    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ServiceAccept);
        w.put_str(&self.service);
        w.finish()
    }
}

/// Authentication method carried by a request.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// "password" without a password change.
    Password(Zeroizing<String>),
}

impl AuthMethod {
    /// Method name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password([REDACTED])"),
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST (RFC 4252 Section 5).
///
/// ```text
/// byte      SSH_MSG_USERAUTH_REQUEST (50)
/// string    user name
/// string    service name
/// string    "password"
/// boolean   FALSE
/// string    plaintext password
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    user_name: String,
    service_name: String,
    method: AuthMethod,
}

impl AuthRequest {
    /// Password request for the "ssh-connection" service.
    pub fn password(user_name: &str, password: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            service_name: CONNECTION_SERVICE.to_string(),
            method: AuthMethod::Password(Zeroizing::new(password.to_string())),
        }
    }

    /// User name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::UserauthRequest);
        w.put_str(&self.user_name)
            .put_str(&self.service_name)
            .put_str(self.method.name());
        match &self.method {
            AuthMethod::Password(password) => {
                w.put_bool(false).put_str(password);
            }
        }
        w.finish()
    }

    /// Parses the message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is malformed, the
    /// method is not "password", or it is a password-change request.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::UserauthRequest)?;
        let user_name = r.read_utf8()?;
        let service_name = r.read_utf8()?;
        let method_name = r.read_utf8()?;

        if method_name != "password" {
            return Err(KeelError::Protocol(format!(
                "Unsupported authentication method: {}",
                method_name
            )));
        }
        if r.read_bool()? {
            return Err(KeelError::Protocol(
                "Password change requests are not supported".to_string(),
            ));
        }
        let password = Zeroizing::new(r.read_utf8()?);

        Ok(Self {
            user_name,
            service_name,
            method: AuthMethod::Password(password),
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    methods_can_continue: Vec<String>,
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a failure message.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods_can_continue: methods,
            partial_success,
        }
    }

    /// Methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods_can_continue
    }

    /// Partial success flag.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let names: Vec<&str> = self.methods_can_continue.iter().map(String::as_str).collect();
        let mut w = WireWriter::message(MessageType::UserauthFailure);
        w.put_name_list(&names).put_bool(self.partial_success);
        w.finish()
    }

    /// Parses the message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is malformed.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::UserauthFailure)?;
        let methods_can_continue = r.read_name_list()?;
        let partial_success = r.read_bool()?;

        Ok(Self {
            methods_can_continue,
            partial_success,
        })
    }
}

/// SSH_MSG_USERAUTH_BANNER (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    message: String,
    language_tag: String,
}

impl AuthBanner {
    /// Creates a banner.
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            language_tag: String::new(),
        }
    }

    /// Banner text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::UserauthBanner);
        w.put_str(&self.message).put_str(&self.language_tag);
        w.finish()
    }

    /// Parses the message. Invalid UTF-8 in the text is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is malformed.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::UserauthBanner)?;
        let message = String::from_utf8_lossy(r.read_string()?).into_owned();
        let language_tag = if r.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(r.read_string()?).into_owned()
        };

        Ok(Self {
            message,
            language_tag,
        })
    }
}

/// Counts password attempts against a budget.
#[derive(Debug, Clone)]
pub struct AuthAttempts {
    used: u32,
    max: u32,
}

impl AuthAttempts {
    /// Allows `max` attempts (at least one).
    pub fn new(max: u32) -> Self {
        Self {
            used: 0,
            max: max.max(1),
        }
    }

    /// Attempts made so far.
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Claims the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::AuthenticationFailed`] once the budget is spent.
    pub fn next_attempt(&mut self) -> KeelResult<u32> {
        if self.used >= self.max {
            return Err(KeelError::AuthenticationFailed(format!(
                "Password rejected {} times",
                self.used
            )));
        }
        self.used += 1;
        Ok(self.used)
    }
}
