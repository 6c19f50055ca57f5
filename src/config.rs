use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    /// Used at checkout when the customer leaves the payment method blank.
    pub default_payment_method: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10);
        let jwt_ttl_hours = parse_or("JWT_TTL_HOURS", 24);
        let default_payment_method = env::var("DEFAULT_PAYMENT_METHOD")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "cash_on_delivery".to_string());
        Ok(Self {
            port,
            database_url,
            database_max_connections,
            host,
            jwt_secret,
            jwt_ttl_hours,
            default_payment_method,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
