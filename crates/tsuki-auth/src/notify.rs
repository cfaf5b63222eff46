//! Outbound mail seam. Transport lives outside the core.

use async_trait::async_trait;
use tracing::info;

use crate::error::{AuthError, Result};
use crate::verification::MailPayload;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

/// Hand a built message to the notifier. Transport failures are
/// [`AuthError::Upstream`].
pub async fn deliver(notifier: &dyn Notifier, mail: &MailPayload) -> Result<()> {
    notifier
        .send_mail(&mail.to, &mail.subject, &mail.html_body)
        .await
        .map_err(|e| AuthError::Upstream(format!("mail delivery failed: {}", e)))
}

/// Writes outgoing mail to the log instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_mail(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        info!(%to, %subject, bytes = html_body.len(), "Outgoing mail (not sent, log transport)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait]
    impl Notifier for Refusing {
        async fn send_mail(&self, _to: &str, _subject: &str, _html_body: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn mail() -> MailPayload {
        MailPayload {
            to: "a@example.com".into(),
            subject: "hi".into(),
            html_body: "<p>hi</p>".into(),
            link: "http://localhost/auth/verify/x".into(),
        }
    }

    #[tokio::test]
    async fn log_transport_accepts_everything() {
        deliver(&LogNotifier, &mail()).await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_is_upstream() {
        match deliver(&Refusing, &mail()).await {
            Err(AuthError::Upstream(msg)) => assert!(msg.contains("smtp unreachable")),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }
}
