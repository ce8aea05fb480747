use anyhow::{Context, Result, anyhow};
use futures_util::future::BoxFuture;
use serde_json::json;

/// Delivery seam for verification codes. Production posts to the Resend
/// HTTP API; tests substitute recording or failing doubles.
pub trait Mailer: Send + Sync {
    fn send_verification<'a>(
        &'a self,
        to: &'a str,
        username: &'a str,
        code: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
        }
    }
}

impl Mailer for ResendMailer {
    fn send_verification<'a>(
        &'a self,
        to: &'a str,
        username: &'a str,
        code: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = json!({
                "from": self.from,
                "to": to,
                "subject": "murmur verification code",
                "html": format!(
                    "<p>Hi {username},</p>\
                     <p>Your verification code is <strong>{code}</strong>. \
                     It expires in one hour.</p>"
                ),
            });

            let response = self
                .client
                .post("https://api.resend.com/emails")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("email provider unreachable")?;

            if !response.status().is_success() {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                return Err(anyhow!("email provider returned {status}: {detail}"));
            }

            Ok(())
        })
    }
}
