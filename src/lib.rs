/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # send-mail
//!
//! _send-mail_ delivers a single e-mail message through an SMTP submission server.
//! It is the library behind the `send-mail` command and includes:
//!
//! - **MIME** message composition through [`mail-builder`](https://crates.io/crates/mail-builder),
//!   with an optional binary attachment read from disk.
//! - SMTP submission (_RFC 6409_) with **STARTTLS** (_RFC 3207_), implicit TLS or clear text.
//! - SMTP authentication (_RFC 4954_) with automatic mechanism negotiation:
//!   - CRAM-MD5 (_RFC 2195_)
//!   - LOGIN
//!   - PLAIN
//!   - XOAUTH2 (Google proprietary)
//! - Configuration from the environment, so no credential ever lives in the binary.
//!
//! ## Usage Example
//!
//! ```rust
//!     let config = SmtpConfig::from_env()?;
//!     let result = Mailer::new(config)
//!         .send(
//!             "bob@example.com",
//!             "Información de usuario: alice",
//!             "Información de 'alice': hello",
//!             None,
//!         )
//!         .await;
//!     std::process::exit(result.exit_code().into());
//! ```
//!
//! A single connection is opened per delivery and is always closed with `QUIT`,
//! whether the message was accepted or not. Nothing is retried.

pub mod config;
pub mod email;
pub mod mailer;
pub mod smtp;

use std::{fmt::Display, time::Duration};

use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

pub use config::{ConfigError, Security, SmtpConfig};
pub use email::{Attachment, EmailMessage};
pub use mailer::{DeliveryError, DeliveryResult, Mailer};

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// STARTTLS not available
    MissingStartTls,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Connection settings for a single SMTP session.
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub tls_implicit: bool,
    pub addr: String,
    pub local_host: String,
}

/// SMTP client.
///
/// `U` holds whatever the client learned from the last EHLO, usually an
/// [`smtp_proto::EhloResponse`]. Before that it is `()`.
pub struct SmtpClient<T: AsyncRead + AsyncWrite, U = ()> {
    pub stream: T,
    pub timeout: Duration,
    pub capabilities: U,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials<T: AsRef<str> + PartialEq + Eq> {
    Plain { username: T, secret: T },
    XOauth2 { username: T, secret: T },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tls(e) => Some(e.as_ref()),
            Error::Base64(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}

impl<T: AsRef<str> + PartialEq + Eq> Credentials<T> {
    /// Creates a new `Credentials` instance.
    pub fn new(username: T, secret: T) -> Credentials<T> {
        Credentials::Plain { username, secret }
    }

    /// Creates a new XOAuth2 `Credentials` instance.
    pub fn new_xoauth2(username: T, secret: T) -> Credentials<T> {
        Credentials::XOauth2 { username, secret }
    }
}

impl<T: AsRef<str> + PartialEq + Eq> AsRef<Credentials<T>> for Credentials<T> {
    fn as_ref(&self) -> &Credentials<T> {
        self
    }
}

impl<T: AsRef<str> + PartialEq + Eq> std::fmt::Debug for Credentials<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, username) = match self {
            Credentials::Plain { username, .. } => ("Plain", username),
            Credentials::XOauth2 { username, .. } => ("XOauth2", username),
        };
        f.debug_struct(kind)
            .field("username", &username.as_ref())
            .field("secret", &"<redacted>")
            .finish()
    }
}
