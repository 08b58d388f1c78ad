use crate::{
    config::Config,
    error::{AppError, Result},
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    Extension, RequestPartsExt, TypedHeader,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    service_token_digest: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub exp: i64,    // 过期时间
    #[serde(default)]
    pub iat: Option<i64>,
}

/// 已认证的终端用户
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

/// 通过内部服务令牌认证的调用方
#[derive(Debug, Clone, Copy)]
pub struct ServiceCaller;

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            service_token_digest: Sha256::digest(config.internal_service_token.as_bytes()).to_vec(),
        }
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }

    /// 比较摘要而非原文，耗时与令牌内容无关
    pub fn verify_service_token(&self, token: &str) -> Result<()> {
        let digest = Sha256::digest(token.as_bytes());
        let mismatch = digest
            .iter()
            .zip(self.service_token_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if mismatch == 0 {
            Ok(())
        } else {
            warn!("Rejected internal call with invalid service token");
            Err(AppError::Authentication("Invalid service token".to_string()))
        }
    }
}

async fn auth_service(parts: &mut Parts) -> Result<Arc<AuthService>> {
    let Extension(auth_service) = parts
        .extract::<Extension<Arc<AuthService>>>()
        .await
        .map_err(|_| AppError::Internal("Auth service not found in request extensions".to_string()))?;
    Ok(auth_service)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Authentication("Missing authorization header".to_string()))?;

        let claims = auth_service(parts).await?.verify_jwt(bearer.token())?;
        Ok(AuthUser { id: claims.sub })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ServiceCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let token = parts
            .headers
            .get(SERVICE_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::Authentication("Missing service token".to_string()))?;

        auth_service(parts).await?.verify_service_token(&token)?;
        Ok(ServiceCaller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn service() -> AuthService {
        AuthService::new(&Config::default())
    }

    fn token(secret: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "bob".to_string(),
            exp: Utc::now().timestamp() + exp_offset,
            iat: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_verify_jwt() {
        let auth = service();
        let secret = Config::default().jwt_secret;

        assert_eq!(auth.verify_jwt(&token(&secret, 3600)).unwrap().sub, "bob");
        assert!(auth.verify_jwt(&token("other-secret", 3600)).is_err());
        assert!(auth.verify_jwt(&token(&secret, -3600)).is_err());
        assert!(auth.verify_jwt("garbage").is_err());
    }

    #[test]
    fn test_verify_service_token() {
        let auth = service();
        assert!(auth
            .verify_service_token(&Config::default().internal_service_token)
            .is_ok());
        assert!(auth.verify_service_token("wrong").is_err());
        assert!(auth.verify_service_token("").is_err());
    }
}
