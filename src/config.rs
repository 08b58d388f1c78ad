use serde::{Deserialize, Serialize};
use std::env;
use crate::services::channels::mobile_push::DEFAULT_PUSH_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Storage configuration
    pub storage_backend: String,
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,
    pub internal_service_token: String,

    // Web Push configuration
    pub enable_web_push: bool,
    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_subject: Option<String>,
    pub web_push_ttl_secs: u32,

    // Mobile Push configuration
    pub enable_mobile_push: bool,
    pub mobile_push_url: String,
    pub mobile_push_access_token: Option<String>,

    // Delivery
    pub delivery_attempt_timeout_secs: u64,

    // WebSocket
    pub websocket_stale_secs: i64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "notify_fanout=debug,tower_http=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),

            storage_backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "surrealdb".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "social".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            internal_service_token: env::var("INTERNAL_SERVICE_TOKEN")
                .map_err(|_| anyhow::anyhow!("INTERNAL_SERVICE_TOKEN must be set"))?,

            enable_web_push: env::var("ENABLE_WEB_PUSH")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            vapid_private_key: non_empty_var("VAPID_PRIVATE_KEY"),
            vapid_public_key: non_empty_var("VAPID_PUBLIC_KEY"),
            vapid_subject: non_empty_var("VAPID_SUBJECT"),
            web_push_ttl_secs: env::var("WEB_PUSH_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()?,

            enable_mobile_push: env::var("ENABLE_MOBILE_PUSH")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            mobile_push_url: env::var("MOBILE_PUSH_URL")
                .unwrap_or_else(|_| DEFAULT_PUSH_URL.to_string()),
            mobile_push_access_token: non_empty_var("MOBILE_PUSH_ACCESS_TOKEN"),

            delivery_attempt_timeout_secs: env::var("DELIVERY_ATTEMPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            websocket_stale_secs: env::var("WEBSOCKET_STALE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn uses_memory_storage(&self) -> bool {
        self.storage_backend.eq_ignore_ascii_case("memory")
    }

    pub fn uses_json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "notify_fanout=debug".to_string(),
            log_format: "pretty".to_string(),
            storage_backend: "memory".to_string(),
            database_url: "http://localhost:8000".to_string(),
            database_namespace: "social".to_string(),
            database_name: "notifications".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            jwt_secret: "development-secret".to_string(),
            internal_service_token: "development-service-token".to_string(),
            enable_web_push: false,
            vapid_private_key: None,
            vapid_public_key: None,
            vapid_subject: None,
            web_push_ttl_secs: 86400,
            enable_mobile_push: false,
            mobile_push_url: DEFAULT_PUSH_URL.to_string(),
            mobile_push_access_token: None,
            delivery_attempt_timeout_secs: 10,
            websocket_stale_secs: 300,
            cors_allowed_origins: "http://localhost:3001".to_string(),
        }
    }
}
