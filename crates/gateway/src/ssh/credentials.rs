//! Immutable connection credentials.

use std::fmt;

use protocol::ConnectRequest;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("host must not be empty")]
    MissingHost,

    #[error("username must not be empty")]
    MissingUsername,

    #[error("either a password or a private key is required")]
    MissingSecret,
}

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    PrivateKey {
        /// PEM or OpenSSH encoded key.
        pem: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("pem", &"<redacted>")
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Target and secret for one remote session. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    host: String,
    port: u16,
    username: String,
    auth: AuthMethod,
}

impl Credentials {
    /// Build credentials from a connect request.
    ///
    /// A private key always wins over a password; the password is discarded.
    pub fn from_request(request: ConnectRequest, default_port: u16) -> Result<Self, CredentialsError> {
        if request.host.trim().is_empty() {
            return Err(CredentialsError::MissingHost);
        }
        if request.username.is_empty() {
            return Err(CredentialsError::MissingUsername);
        }

        let auth = match (request.private_key, request.password) {
            (Some(pem), _) if !pem.trim().is_empty() => AuthMethod::PrivateKey {
                pem,
                passphrase: request.passphrase.filter(|p| !p.is_empty()),
            },
            (_, Some(password)) => AuthMethod::Password(password),
            _ => return Err(CredentialsError::MissingSecret),
        };

        Ok(Self {
            host: request.host,
            port: request.port.unwrap_or(default_port),
            username: request.username,
            auth,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth(&self) -> &AuthMethod {
        &self.auth
    }
}
