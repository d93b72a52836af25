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

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use send_mail::{
    email::{
        attachment_body, attachment_subject, file_name, notification_body, notification_subject,
    },
    DeliveryError, Mailer, SmtpConfig,
};

/// Sends an e-mail through the SMTP server configured in the environment.
///
/// With three arguments a notice about USER is sent to RECIPIENT.
/// With two arguments the first one is a file, sent to RECIPIENT as an attachment.
///
/// Server and account come from SMTP_HOST, SMTP_PORT, SMTP_FROM, SMTP_USERNAME,
/// SMTP_PASSWORD (or SMTP_OAUTH_TOKEN) and SMTP_SECURITY, also read from a .env file.
#[derive(Debug, Parser)]
#[command(name = "send-mail", version)]
struct Args {
    /// User the notice is about, or the file to attach
    #[arg(value_name = "USER|FILE")]
    subject_of: String,

    /// Recipient address
    recipient: String,

    /// Information about USER; leave out to send FILE instead
    info: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Request {
    Notification {
        user: String,
        recipient: String,
        info: String,
    },
    Attachment {
        path: PathBuf,
        recipient: String,
    },
}

impl Args {
    fn into_request(self) -> Request {
        match self.info {
            Some(info) => Request::Notification {
                user: self.subject_of,
                recipient: self.recipient,
                info,
            },
            None => Request::Attachment {
                path: self.subject_of.into(),
                recipient: self.recipient,
            },
        }
    }
}

/// Help and version requests succeed, every other parse failure exits with 1.
fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

fn main() -> ExitCode {
    // Loaded first so RUST_LOG can come from the .env file too.
    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = dotenv {
        if !err.not_found() {
            log::warn!("Ignoring .env file: {err}");
        }
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            err.print().ok();
            return ExitCode::from(usage_exit_code(&err));
        }
    };

    ExitCode::from(run(args.into_request()))
}

/// Fails early when the file to attach is missing, before configuration is needed.
fn check_attachment(request: &Request) -> Result<(), DeliveryError> {
    match request {
        Request::Attachment { path, .. } if !path.exists() => {
            Err(DeliveryError::FileNotFound(path.clone()))
        }
        _ => Ok(()),
    }
}

fn run(request: Request) -> u8 {
    if let Err(err) = check_attachment(&request) {
        log::error!("{err}");
        return 1;
    }

    let config = match SmtpConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Configuration error: {err}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("Failed to start runtime: {err}");
            return 1;
        }
    };

    let mailer = Mailer::new(config);
    let result = runtime.block_on(async {
        match &request {
            Request::Notification {
                user,
                recipient,
                info,
            } => {
                mailer
                    .send(
                        recipient,
                        &notification_subject(user),
                        &notification_body(user, info),
                        None,
                    )
                    .await
            }
            Request::Attachment { path, recipient } => {
                let filename = file_name(path);
                mailer
                    .send(
                        recipient,
                        &attachment_subject(&filename),
                        &attachment_body(&filename),
                        Some(path.as_path()),
                    )
                    .await
            }
        }
    });

    result.exit_code()
}
