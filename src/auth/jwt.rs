use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::{Authenticator, Claims};

pub struct JwtValidator {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AppError::Auth("Token authentication is not configured".to_string()))?;

        let token_data = decode::<Claims>(token, key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

impl Authenticator for JwtValidator {
    fn authenticate(&self, token: Option<&str>) -> Result<Option<String>, AppError> {
        match token {
            None => Ok(None),
            Some(token) => self
                .validate(token)
                .map(|claims| Some(claims.identity().to_string())),
        }
    }

    fn is_enabled(&self) -> bool {
        self.decoding_key.is_some()
    }
}
