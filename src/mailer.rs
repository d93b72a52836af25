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

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
};

use smtp_proto::{EhloResponse, EXT_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    config::{Security, SmtpConfig},
    email::{Attachment, EmailMessage},
    smtp::message::{IntoMessage, Message},
    Credentials, SmtpClient,
};

/// Why a delivery did not happen.
#[derive(Debug)]
pub enum DeliveryError {
    /// The request itself is unusable (for instance an empty recipient).
    InvalidArguments(String),

    /// The attachment does not exist.
    FileNotFound(PathBuf),

    /// The attachment exists but could not be read.
    Attachment(PathBuf, io::Error),

    /// Connection, TLS, authentication or protocol failure.
    Transport(crate::Error),
}

/// Outcome of one call to [`Mailer::send`].
#[derive(Debug)]
pub enum DeliveryResult {
    Sent,
    Failed(DeliveryError),
}

/// Sends one message per call over a fresh SMTP session.
#[derive(Debug, Clone)]
pub struct Mailer {
    config: SmtpConfig,
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::InvalidArguments(reason) => write!(f, "Invalid arguments: {reason}"),
            DeliveryError::FileNotFound(path) => write!(f, "File not found: {}", path.display()),
            DeliveryError::Attachment(path, err) => {
                write!(f, "Could not read {}: {err}", path.display())
            }
            DeliveryError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Attachment(_, err) => Some(err),
            DeliveryError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<crate::Error> for DeliveryError {
    fn from(err: crate::Error) -> Self {
        DeliveryError::Transport(err)
    }
}

impl DeliveryResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryResult::Sent)
    }

    /// Process exit code: 0 when sent, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            DeliveryResult::Sent => 0,
            DeliveryResult::Failed(_) => 1,
        }
    }
}

impl From<Result<(), DeliveryError>> for DeliveryResult {
    fn from(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => DeliveryResult::Sent,
            Err(err) => DeliveryResult::Failed(err),
        }
    }
}

impl Mailer {
    pub fn new(config: SmtpConfig) -> Self {
        Mailer { config }
    }

    /// Sends `body_text` to `recipient` from the configured sender, attaching
    /// the file at `attachment` if given. The file is read before any
    /// connection is made. Logs one line with the outcome.
    pub async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body_text: &str,
        attachment: Option<&Path>,
    ) -> DeliveryResult {
        let result = self
            .try_send(recipient, subject, body_text, attachment)
            .await;
        match &result {
            Ok(()) => log::info!("Email sent to {recipient}"),
            Err(err) => log::error!("Error sending email to {recipient}: {err}"),
        }
        result.into()
    }

    async fn try_send(
        &self,
        recipient: &str,
        subject: &str,
        body_text: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        if recipient.trim().is_empty() {
            return Err(DeliveryError::InvalidArguments(
                "recipient address is empty".to_string(),
            ));
        }

        let mut message = EmailMessage::new(
            self.config.sender.as_str(),
            recipient,
            subject,
            body_text,
        );
        if let Some(path) = attachment {
            message = message.attachment(read_attachment(path)?);
        }

        self.deliver(&message).await.map_err(DeliveryError::from)
    }

    /// Composes `message` and runs one SMTP session for it.
    pub async fn deliver(&self, message: &EmailMessage) -> crate::Result<()> {
        let envelope = message.into_message()?;
        let builder = self.config.client_builder();
        log::debug!(
            "Delivering to {} via {}:{} ({:?})",
            message.recipient,
            self.config.host,
            self.config.port,
            self.config.security
        );

        match self.config.security {
            Security::Plain => {
                session(
                    builder.connect_plain().await?,
                    &self.config.credentials,
                    envelope,
                )
                .await
            }
            Security::StartTls | Security::Implicit => {
                session(builder.connect().await?, &self.config.credentials, envelope).await
            }
        }
    }
}

fn read_attachment(path: &Path) -> Result<Attachment, DeliveryError> {
    Attachment::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => DeliveryError::FileNotFound(path.to_path_buf()),
        _ => DeliveryError::Attachment(path.to_path_buf(), err),
    })
}

/// Authenticates and sends, then closes the session whatever the outcome.
async fn session<T: AsyncRead + AsyncWrite + Unpin>(
    mut client: SmtpClient<T, EhloResponse<String>>,
    credentials: &Credentials<String>,
    mut message: Message<'_>,
) -> crate::Result<()> {
    if client.capabilities.has_capability(EXT_SIZE) {
        message
            .mail_from
            .parameters
            .add("SIZE", message.body.len().to_string());
    }

    let result = match client.authenticate(credentials).await.map(|_| ()) {
        Ok(()) => client.send(message).await,
        Err(err) => Err(err),
    };

    // The message is already accepted or refused at this point.
    if let Err(err) = client.quit().await {
        log::debug!("QUIT failed: {err}");
    }

    result
}

#[cfg(test)]
mod test {
    use std::{io::Write, path::Path, time::Duration};

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::{DeliveryError, DeliveryResult, Mailer};
    use crate::{
        config::{Security, SmtpConfig},
        email::{notification_body, notification_subject},
        Credentials,
    };

    fn config(port: u16, security: Security) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port,
            sender: "alerts@example.com".to_string(),
            credentials: Credentials::new("alerts@example.com".to_string(), "secret".to_string()),
            security,
            timeout: Duration::from_secs(5),
            helo_host: Some("client.test".to_string()),
            allow_invalid_certs: false,
        }
    }

    /// Serves a single SMTP session and returns every line the client sent.
    async fn mock_server(
        ehlo_reply: &'static str,
        auth_reply: &'static str,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut received = Vec::new();
            let mut in_data = false;

            writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line.clone());
                let reply = if in_data {
                    if line != "." {
                        continue;
                    }
                    in_data = false;
                    "250 2.0.0 queued\r\n"
                } else if line.starts_with("EHLO") {
                    ehlo_reply
                } else if line.starts_with("AUTH") {
                    auth_reply
                } else if line.starts_with("MAIL FROM") || line.starts_with("RCPT TO") {
                    "250 2.1.0 ok\r\n"
                } else if line == "DATA" {
                    in_data = true;
                    "354 go ahead\r\n"
                } else if line == "QUIT" {
                    writer.write_all(b"221 2.0.0 bye\r\n").await.unwrap();
                    break;
                } else {
                    "500 5.5.1 unrecognized\r\n"
                };
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (port, handle)
    }

    const EHLO_PLAIN: &str = "250-mock\r\n250-AUTH PLAIN\r\n250 8BITMIME\r\n";

    #[tokio::test]
    async fn sends_notification() {
        let (port, server) = mock_server(EHLO_PLAIN, "235 2.7.0 ok\r\n").await;
        let result = Mailer::new(config(port, Security::Plain))
            .send(
                "bob@example.com",
                &notification_subject("alice"),
                &notification_body("alice", "hello"),
                None,
            )
            .await;
        assert!(result.is_sent(), "{result:?}");
        assert_eq!(result.exit_code(), 0);

        let received = server.await.unwrap();
        assert_eq!(received[0], "EHLO client.test");
        assert_eq!(
            received[1],
            "AUTH PLAIN AGFsZXJ0c0BleGFtcGxlLmNvbQBzZWNyZXQ="
        );
        assert_eq!(received[2], "MAIL FROM:<alerts@example.com>");
        assert_eq!(received[3], "RCPT TO:<bob@example.com>");
        assert_eq!(received[4], "DATA");
        assert!(received.iter().any(|line| line.starts_with("Subject:")));
        assert_eq!(received.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn declares_message_size() {
        let (port, server) = mock_server(
            "250-mock\r\n250-SIZE 10485760\r\n250 AUTH PLAIN\r\n",
            "235 2.7.0 ok\r\n",
        )
        .await;
        let result = Mailer::new(config(port, Security::Plain))
            .send("bob@example.com", "Hi", "hello", None)
            .await;
        assert!(result.is_sent(), "{result:?}");

        let received = server.await.unwrap();
        let size = received[2]
            .strip_prefix("MAIL FROM:<alerts@example.com> SIZE=")
            .unwrap_or_else(|| panic!("unexpected MAIL FROM {:?}", received[2]))
            .parse::<usize>()
            .unwrap();
        let data = received.iter().position(|line| line == "DATA").unwrap();
        let body: usize = received[data + 1..received.len() - 2]
            .iter()
            .map(|line| line.len() + 2)
            .sum();
        // A CRLF is appended before the terminator when the body lacks one
        assert!(body == size || body == size + 2, "{size} vs {body}");
    }

    #[tokio::test]
    async fn sends_attachment() {
        let mut file = tempfile::Builder::new()
            .prefix("report")
            .suffix(".txt")
            .tempfile()
            .unwrap();
        file.write_all(b"quarterly numbers").unwrap();

        let (port, server) = mock_server(EHLO_PLAIN, "235 2.7.0 ok\r\n").await;
        let result = Mailer::new(config(port, Security::Plain))
            .send("bob@example.com", "Files", "see attached", Some(file.path()))
            .await;
        assert!(result.is_sent(), "{result:?}");

        let received = server.await.unwrap();
        assert!(received
            .iter()
            .any(|line| line.contains("multipart/mixed")));
        assert!(received
            .iter()
            .any(|line| line.contains("application/octet-stream")));
        assert_eq!(received.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn missing_attachment_never_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = Mailer::new(config(port, Security::StartTls))
            .send(
                "bob@example.com",
                "Files",
                "see attached",
                Some(Path::new("/tmp/send-mail-test/missing.txt")),
            )
            .await;
        match &result {
            DeliveryResult::Failed(DeliveryError::FileNotFound(path)) => {
                assert_eq!(path, Path::new("/tmp/send-mail-test/missing.txt"))
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(result.exit_code(), 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), listener.accept())
                .await
                .is_err(),
            "a connection was attempted"
        );
    }

    #[tokio::test]
    async fn rejected_credentials_release_connection() {
        let (port, server) = mock_server(EHLO_PLAIN, "535 5.7.8 bad credentials\r\n").await;
        let result = Mailer::new(config(port, Security::Plain))
            .send("bob@example.com", "Hi", "hello", None)
            .await;
        match &result {
            DeliveryResult::Failed(DeliveryError::Transport(
                crate::Error::AuthenticationFailed(reply),
            )) => assert_eq!(reply.code(), 535),
            other => panic!("unexpected result {other:?}"),
        }

        let received = server.await.unwrap();
        assert!(!received.iter().any(|line| line.starts_with("MAIL FROM")));
        assert_eq!(received.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn refuses_to_send_without_starttls() {
        let (port, server) = mock_server(EHLO_PLAIN, "235 2.7.0 ok\r\n").await;
        let result = Mailer::new(config(port, Security::StartTls))
            .send("bob@example.com", "Hi", "hello", None)
            .await;
        assert!(matches!(
            result,
            DeliveryResult::Failed(DeliveryError::Transport(crate::Error::MissingStartTls))
        ));
        assert_eq!(
            server.await.unwrap(),
            vec!["EHLO client.test".to_string(), "QUIT".to_string()]
        );
    }

    #[tokio::test]
    async fn unreachable_server() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = Mailer::new(config(port, Security::StartTls))
            .send("bob@example.com", "Hi", "hello", None)
            .await;
        assert!(matches!(
            result,
            DeliveryResult::Failed(DeliveryError::Transport(crate::Error::Io(_)))
        ));
        assert_eq!(result.exit_code(), 1);
    }

    #[tokio::test]
    async fn empty_recipient() {
        let result = Mailer::new(config(1, Security::Plain))
            .send("  ", "Hi", "hello", None)
            .await;
        assert!(matches!(
            result,
            DeliveryResult::Failed(DeliveryError::InvalidArguments(_))
        ));
    }
}
