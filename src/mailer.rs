#![cfg(feature = "web")]

use crate::config::SmtpConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use std::error::Error;

pub type MailResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// SMTP sender for account emails
pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    /// Build an implicit-TLS SMTP transport from the configured relay
    pub fn new(config: &SmtpConfig) -> MailResult<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let tls_parameters = TlsParameters::new(config.host.clone())?;

        let smtp = SmtpTransport::relay(&config.host)?
            .credentials(creds)
            .port(config.port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
        })
    }

    /// Send a password reset code; blocks until the relay answers
    pub fn send_password_reset(&self, to_email: &str, reset_code: &str) -> MailResult<()> {
        let email = Message::builder()
            .from(format!("learnlab <{}>", self.from).parse()?)
            .to(to_email.parse()?)
            .subject("Password Reset Request")
            .body(format!(
                "Your password reset code is: {}\nThis code will expire in 1 hour.",
                reset_code
            ))?;

        self.smtp.send(&email)?;
        log::info!("sent password reset code to {}", to_email);
        Ok(())
    }
}
