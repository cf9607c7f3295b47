//! User notifications
//!
//! Fire-and-forget sink: a `notifications` row for the in-app feed, plus an
//! optional email through the Resend HTTP API when configured. Delivery
//! failures are logged and never propagated; nothing in the billing core
//! depends on a notification having landed.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Email configuration for outbound notifications
#[derive(Debug, Clone)]
pub struct EmailConfig {
    api_key: String,
    from_address: String,
}

/// Notification sink for billing events
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    http: reqwest::Client,
    email: Option<EmailConfig>,
}

impl NotificationService {
    /// Build from environment; email is optional
    pub fn from_env(pool: PgPool) -> Self {
        let email = match std::env::var("RESEND_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Some(EmailConfig {
                api_key,
                from_address: std::env::var("NOTIFY_FROM_EMAIL")
                    .unwrap_or_else(|_| "ComplyKit <notify@complykit.io>".to_string()),
            }),
            _ => None,
        };

        if email.is_none() {
            tracing::warn!("Email notifications not configured (missing RESEND_API_KEY)");
        }

        Self {
            pool,
            http: reqwest::Client::new(),
            email,
        }
    }

    pub fn is_email_enabled(&self) -> bool {
        self.email.is_some()
    }

    /// Record an in-app notification and, if configured, email the user
    pub async fn notify_user(
        &self,
        user_id: Uuid,
        email: &str,
        notification_type: &str,
        title: &str,
        body: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, notification_type, title, body, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(title)
        .bind(body)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self.send_email(email, title, body).await {
            tracing::error!(
                user_id = %user_id,
                error = %e,
                "Failed to send notification email"
            );
        }

        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), reqwest::Error> {
        let Some(config) = &self.email else {
            return Ok(());
        };

        self.http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&config.api_key)
            .json(&json!({
                "from": config.from_address,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
