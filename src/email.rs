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

use std::{io, path::Path};

use mail_builder::MessageBuilder;

use crate::smtp::message::{IntoMessage, Message};

pub const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file read into memory, ready to be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    pub attachment: Option<Attachment>,
}

impl Attachment {
    /// Reads the whole file. The attachment is named after the last path component.
    pub fn read(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Attachment {
            filename: file_name(path),
            content: std::fs::read(path)?,
        })
    }
}

/// Last component of `path`, as shown to the recipient.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

/// Subject of the user information notice.
pub fn notification_subject(user: &str) -> String {
    format!("Información de usuario: {user}")
}

/// Body of the user information notice.
pub fn notification_body(user: &str, info: &str) -> String {
    format!("Información de '{user}': {info}")
}

/// Subject of a message carrying `filename`.
pub fn attachment_subject(filename: &str) -> String {
    format!("Archivo adjunto: {filename}")
}

/// Body of a message carrying `filename`.
pub fn attachment_body(filename: &str) -> String {
    format!("Se adjunta el archivo '{filename}'.")
}

impl EmailMessage {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        EmailMessage {
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body_text: body_text.into(),
            attachment: None,
        }
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Builds the MIME representation of this message.
    pub fn to_builder(&self) -> MessageBuilder<'_> {
        let builder = MessageBuilder::new()
            .from(self.sender.as_str())
            .to(self.recipient.as_str())
            .subject(self.subject.as_str())
            .text_body(self.body_text.as_str());

        match &self.attachment {
            Some(attachment) => builder.attachment(
                ATTACHMENT_CONTENT_TYPE,
                attachment.filename.as_str(),
                attachment.content.as_slice(),
            ),
            None => builder,
        }
    }
}

impl<'x> IntoMessage<'x> for &EmailMessage {
    fn into_message(self) -> crate::Result<Message<'x>> {
        if self.sender.trim().is_empty() {
            return Err(crate::Error::MissingMailFrom);
        }
        if self.recipient.trim().is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        Ok(Message::new(
            self.sender.trim().to_string(),
            [self.recipient.trim().to_string()],
            self.to_builder().write_to_vec()?,
        ))
    }
}
