use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;

use crate::error::MailError;

/// Narrow interface over outbound mail
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        text: &str,
    ) -> Result<(), MailError>;
}

/// Mail transport via AWS SES
pub struct SesMailer {
    client: SesClient,
}

impl SesMailer {
    pub fn new(client: SesClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        text: &str,
    ) -> Result<(), MailError> {
        let destination = Destination::builder()
            .set_to_addresses(Some(to.to_vec()))
            .build();

        let subject = Content::builder()
            .data(subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| MailError::Build(format!("subject: {:?}", e)))?;

        let text_content = Content::builder()
            .data(text)
            .charset("UTF-8")
            .build()
            .map_err(|e| MailError::Build(format!("text content: {:?}", e)))?;

        let body = Body::builder().text(text_content).build();

        let message = Message::builder().subject(subject).body(body).build();

        let email_content = EmailContent::builder().simple(message).build();

        self.client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(email_content)
            .send()
            .await
            .map_err(|e| MailError::Send(format!("{:?}", e)))?;

        tracing::info!("Email sent to {} recipients", to.len());
        Ok(())
    }
}
