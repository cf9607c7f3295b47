//! API server configuration

use anyhow::Context;

/// API server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Secret used to validate bearer tokens from the identity provider
    pub jwt_secret: String,
    /// Static token gating operator maintenance endpoints
    pub admin_token: String,
    /// Comma-separated CORS origin allowlist
    pub allowed_origins: String,
    /// Whether to initialize Stripe billing at startup
    pub enable_billing: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let admin_token = std::env::var("ADMIN_API_TOKEN").context("ADMIN_API_TOKEN must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());
        let enable_billing = std::env::var("ENABLE_BILLING")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            admin_token,
            allowed_origins,
            enable_billing,
        })
    }
}
