//! Billing error types

use thiserror::Error;

/// Result alias for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing core
///
/// `Validation` and `Configuration` are terminal for the request that raised
/// them and are never retried automatically. `Stripe` covers transient
/// external failures: surfaced to the caller on the checkout path, turned
/// into a 5xx on the webhook path so the processor redelivers.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or missing caller input (bad tier, missing email)
    #[error("validation error: {0}")]
    Validation(String),

    /// Required external catalog entry missing; run the catalog sync
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Webhook payload failed signature verification
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Webhook event carried an unexpected payload object
    #[error("webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    /// Stripe API error (network, timeout, or API rejection)
    #[error("stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the caller may usefully retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Stripe(_) | Self::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_configuration_are_not_retryable() {
        assert!(!BillingError::Validation("bad tier".into()).is_retryable());
        assert!(!BillingError::Configuration("price not synced".into()).is_retryable());
        assert!(!BillingError::WebhookSignatureInvalid.is_retryable());
    }

    #[test]
    fn configuration_error_names_the_remedy() {
        let err = BillingError::Configuration(
            "no active price for growth/monthly - run catalog sync".into(),
        );
        assert!(err.to_string().contains("run catalog sync"));
    }
}
