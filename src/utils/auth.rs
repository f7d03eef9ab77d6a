use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Identity handed over by the sign-in layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // owner id (email)
    pub exp: usize,
    pub jti: String,
}

impl Claims {
    pub fn owner_id(&self) -> &str {
        &self.sub
    }
}

pub fn create_jwt(owner_id: &str, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| anyhow::anyhow!("expiration overflow"))?
        .timestamp();

    let claims = Claims {
        sub: owner_id.to_owned(),
        exp: expiration as usize,
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    if token_data.claims.sub.trim().is_empty() {
        anyhow::bail!("token has no subject");
    }

    Ok(token_data.claims)
}
