// src/exec/activities/send_email.rs

//! `send-email` activity and the mailer seam it delivers through.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::info;

use crate::exec::activity::{require, Activity, ActivityContext, ActivityError};
use crate::model::{ActivityConfig, ActivityKind};
use crate::types::BoxFuture;

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s,]+@[^@\s,]+\.[^@\s,]+$").expect("address regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers a message. Swap in a real transport at startup.
pub trait Mailer: Send + Sync {
    fn send(&self, message: EmailMessage) -> BoxFuture<'_, Result<(), ActivityError>>;
}

/// Default mailer: logs the message instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: EmailMessage) -> BoxFuture<'_, Result<(), ActivityError>> {
        Box::pin(async move {
            info!(
                to = ?message.to,
                subject = %message.subject,
                body_len = message.body.len(),
                "sending email"
            );
            Ok(())
        })
    }
}

/// `send-email`: `to` (comma separated), `subject`, optional `body`.
#[derive(Clone)]
pub struct SendEmail {
    mailer: Arc<dyn Mailer>,
}

impl SendEmail {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

impl Default for SendEmail {
    fn default() -> Self {
        Self::new(Arc::new(LogMailer))
    }
}

fn recipients(config: &ActivityConfig) -> Result<Vec<String>, ActivityError> {
    let to = require(config, "to")?;
    to.split(',')
        .map(str::trim)
        .map(|addr| {
            if ADDRESS.is_match(addr) {
                Ok(addr.to_string())
            } else {
                Err(ActivityError::InvalidConfig {
                    key: "to".into(),
                    reason: format!("'{addr}' is not an email address"),
                })
            }
        })
        .collect()
}

impl Activity for SendEmail {
    fn kind(&self) -> ActivityKind {
        ActivityKind::send_email()
    }

    fn validate_config(&self, config: &ActivityConfig) -> Result<(), ActivityError> {
        recipients(config)?;
        require(config, "subject")?;
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        config: &'a ActivityConfig,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let message = EmailMessage {
                to: recipients(config)?,
                subject: require(config, "subject")?.to_string(),
                body: config.get("body").cloned().unwrap_or_default(),
            };
            info!(pipeline = %ctx.pipeline_id, task = %ctx.task_id, "delivering email");
            self.mailer.send(message).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::PipelineId;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<EmailMessage>>);

    impl Mailer for Outbox {
        fn send(&self, message: EmailMessage) -> BoxFuture<'_, Result<(), ActivityError>> {
            self.0.lock().unwrap().push(message);
            Box::pin(async { Ok(()) })
        }
    }

    fn config(pairs: &[(&str, &str)]) -> ActivityConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn rejects_bad_address() {
        let err = SendEmail::default()
            .validate_config(&config(&[("to", "ops@example.com, nope"), ("subject", "s")]))
            .unwrap_err();
        assert!(matches!(err, ActivityError::InvalidConfig { key, .. } if key == "to"));
    }

    #[test]
    fn subject_is_required() {
        let err = SendEmail::default()
            .validate_config(&config(&[("to", "ops@example.com")]))
            .unwrap_err();
        assert!(matches!(err, ActivityError::MissingConfig(k) if k == "subject"));
    }

    #[tokio::test]
    async fn delivers_through_mailer() {
        let outbox = Arc::new(Outbox::default());
        let activity = SendEmail::new(outbox.clone());
        let ctx = ActivityContext {
            pipeline_id: PipelineId::new(),
            task_id: "notify".into(),
            attempt: 1,
        };

        activity
            .execute(
                &ctx,
                &config(&[("to", "a@example.com,b@example.com"), ("subject", "done")]),
            )
            .await
            .unwrap();

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(sent[0].body, "");
    }
}
