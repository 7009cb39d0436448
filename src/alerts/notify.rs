//! Alert delivery channels. Each channel reports its own result; a failed
//! channel never aborts the others.

use hmac::{Hmac, Mac};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use crate::config::Settings;

use super::DailyDigest;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelResult {
    fn not_configured(channel: &str, reason: &str) -> Self {
        Self {
            channel: channel.into(),
            delivered: false,
            status: None,
            reason: Some(reason.into()),
            error: None,
        }
    }

    fn failed(channel: &str, error: String) -> Self {
        Self { channel: channel.into(), delivered: false, status: None, reason: None, error: Some(error) }
    }
}

pub async fn send_email(subject: &str, body: &str, settings: &Settings) -> ChannelResult {
    let Some(host) = &settings.smtp_host else {
        return ChannelResult::not_configured("email", "smtp_not_configured");
    };

    let from = settings
        .alert_email_from
        .clone()
        .unwrap_or_else(|| "alerts@stocksense.local".into());
    let to = settings
        .alert_email_to
        .clone()
        .or_else(|| settings.alert_email_from.clone())
        .unwrap_or_else(|| "devnull@local".into());

    let message = match Message::builder()
        .from(match from.parse() {
            Ok(m) => m,
            Err(e) => return ChannelResult::failed("email", format!("bad from address: {e}")),
        })
        .to(match to.parse() {
            Ok(m) => m,
            Err(e) => return ChannelResult::failed("email", format!("bad to address: {e}")),
        })
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
    {
        Ok(m) => m,
        Err(e) => return ChannelResult::failed("email", format!("building message: {e}")),
    };

    let transport = if let (Some(user), Some(pass)) = (&settings.smtp_user, &settings.smtp_pass) {
        match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
            Ok(builder) => builder
                .port(settings.smtp_port)
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .build(),
            Err(e) => return ChannelResult::failed("email", format!("smtp transport: {e}")),
        }
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(settings.smtp_port)
            .build()
    };

    match transport.send(message).await {
        Ok(_) => ChannelResult {
            channel: "email".into(),
            delivered: true,
            status: None,
            reason: None,
            error: None,
        },
        Err(e) => ChannelResult::failed("email", e.to_string()),
    }
}

pub async fn send_webhook(payload: &serde_json::Value, settings: &Settings) -> ChannelResult {
    let Some(url) = &settings.alert_webhook_url else {
        return ChannelResult::not_configured("webhook", "webhook_not_configured");
    };

    let body = payload.to_string();
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(c) => c,
        Err(e) => return ChannelResult::failed("webhook", e.to_string()),
    };

    let mut req = client
        .post(url)
        .header("Content-Type", "application/json")
        .body(body.clone());
    if let Some(secret) = &settings.alert_signing_secret {
        req = req.header("X-Signature", sign_body(secret, &body));
    }

    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            ChannelResult {
                channel: "webhook".into(),
                delivered: status < 300,
                status: Some(status),
                reason: None,
                error: None,
            }
        }
        Err(e) => ChannelResult::failed("webhook", e.to_string()),
    }
}

/// Hex HMAC-SHA256 of the request body, carried in `X-Signature`.
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Fan the digest out to the requested channels, collecting one result
/// per channel.
pub async fn dispatch_digest(
    digest: &DailyDigest,
    channels: &[String],
    settings: &Settings,
) -> Vec<ChannelResult> {
    let mut results = Vec::new();
    if channels.iter().any(|c| c == "email") {
        let (subject, body) = digest.render_email();
        results.push(send_email(&subject, &body, settings).await);
    }
    if channels.iter().any(|c| c == "webhook") {
        results.push(send_webhook(&digest.to_payload(), settings).await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let a = sign_body("secret", r#"{"digest":{}}"#);
        let b = sign_body("secret", r#"{"digest":{}}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, sign_body("other", r#"{"digest":{}}"#));
    }

    #[tokio::test]
    async fn unconfigured_channels_report_without_error() {
        let settings = crate::config::Settings::for_tests();
        let r = send_webhook(&serde_json::json!({}), &settings).await;
        assert!(!r.delivered);
        assert_eq!(r.reason.as_deref(), Some("webhook_not_configured"));

        let r = send_email("s", "b", &settings).await;
        assert!(!r.delivered);
        assert_eq!(r.reason.as_deref(), Some("smtp_not_configured"));
    }
}
