//! Email service for overdue reminders and availability notices

use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send an overdue (or due-today) reminder for one line item
    pub async fn send_overdue_reminder(
        &self,
        to: &str,
        user_name: &str,
        equipment_name: &str,
        request_id: &str,
        days_overdue: i64,
    ) -> AppResult<()> {
        let (subject, opening) = if days_overdue == 0 {
            (
                format!("Reminder: {} is due back today", equipment_name),
                "is due back today".to_string(),
            )
        } else {
            (
                format!("Overdue: {} ({} day(s) late)", equipment_name, days_overdue),
                format!("is {} day(s) overdue", days_overdue),
            )
        };

        let body = format!(
            r#"
Hello {user_name},

The equipment "{equipment_name}" from your borrow request {request_id} {opening}.

Please return it as soon as possible so it becomes available for other borrowers.
"#,
        );

        self.send_email(to, &subject, &body).await
    }

    /// Notify a waiting borrower that equipment units were released
    pub async fn send_availability_notice(
        &self,
        to: &str,
        user_name: &str,
        equipment_name: &str,
    ) -> AppResult<()> {
        let subject = format!("{} is available again", equipment_name);
        let body = format!(
            r#"
Hello {user_name},

Units of "{equipment_name}" have just been released and may now be available
for your pending borrow request.
"#,
        );

        self.send_email(to, &subject, &body).await
    }

    /// Generic email sending function
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let from_name = self
            .config
            .smtp_from_name
            .as_deref()
            .unwrap_or("Lendkit");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!(
                                r#"<html><body><pre>{}</pre></body></html>"#,
                                body.replace('\n', "<br>")
                            )),
                    ),
            )
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        let mut builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("SMTP relay error: {}", e)))?
                .port(self.config.smtp_port)
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host).port(self.config.smtp_port)
        };

        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder.build();

        mailer
            .send(&email)
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        tracing::debug!("Email sent to {} ({})", to, subject);
        Ok(())
    }
}
