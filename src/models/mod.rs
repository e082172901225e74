use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Upper bound on stored token identifiers and csrf values.
pub const TOKEN_IDENTIFIER_MAX_LEN: usize = 64;

/// Server-side state of an issued token. A JWT is only honoured while a
/// matching, non-revoked record exists.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessTokenRecord {
    pub id: Uuid,
    pub token_jti: String,
    pub csrf: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessToken {
    pub token_jti: String,
    pub csrf: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl NewAccessToken {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_jti.is_empty() || self.token_jti.len() > TOKEN_IDENTIFIER_MAX_LEN {
            anyhow::bail!("token identifiers must contain 1 to {} characters", TOKEN_IDENTIFIER_MAX_LEN);
        }
        if self.csrf.is_empty() || self.csrf.len() > TOKEN_IDENTIFIER_MAX_LEN {
            anyhow::bail!("token csrf must contain 1 to {} characters", TOKEN_IDENTIFIER_MAX_LEN);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iss: String,  // Issuer
    pub nbf: i64,     // Not before
    pub iat: i64,     // Issued at
    pub jti: String,  // Token id, matches AccessTokenRecord::token_jti
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,  // Subject (user ID)
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,  // Audience (string or array on the wire)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf: Option<String>,
    pub exp: i64,     // Expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fresh: Option<bool>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl JwtClaims {
    pub fn is_fresh(&self) -> bool {
        self.fresh.unwrap_or(false)
    }
}

// Custom deserializer for audience field to handle both string and array
fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_owned()])
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Vec<String>, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut audience = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                audience.push(item);
            }
            Ok(audience)
        }
    }

    deserializer.deserialize_any(AudienceVisitor)
}

/// The slice of a user the token layer needs: identity plus a snapshot of
/// its scopes at issuance time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSubject {
    pub id: Uuid,
    pub scopes: Vec<String>,
}

impl TokenSubject {
    pub fn new(id: Uuid, scopes: Vec<String>) -> Self {
        Self { id, scopes }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BearerResponse {
    pub token_type: String,
    pub access_token: String,
    pub access_token_csrf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_csrf: Option<String>,
}

impl BearerResponse {
    pub fn new(access_token: String, access_token_csrf: String) -> Self {
        Self {
            token_type: "bearer".to_string(),
            access_token,
            access_token_csrf,
            refresh_token: None,
            refresh_token_csrf: None,
        }
    }

    pub fn with_refresh(mut self, refresh_token: String, refresh_token_csrf: String) -> Self {
        self.refresh_token = Some(refresh_token);
        self.refresh_token_csrf = Some(refresh_token_csrf);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainMessage {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_json(aud: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "type": "access",
            "iss": "GCAPI",
            "nbf": 1700000000,
            "iat": 1700000000,
            "jti": "d7a4c5f2-0000-4000-8000-000000000000",
            "sub": "4f1b2f0e-2b9a-4c1e-9d6a-1f0c2b3a4d5e",
            "aud": aud,
            "csrf": "csrf-value",
            "exp": 1700003600,
            "scopes": ["role:user"]
        })
    }

    #[test]
    fn test_audience_accepts_string_or_array() {
        let single: JwtClaims = serde_json::from_value(claims_json("auth:access".into())).unwrap();
        assert_eq!(single.aud, vec!["auth:access".to_string()]);

        let many: JwtClaims =
            serde_json::from_value(claims_json(serde_json::json!(["auth:access", "auth:other"]))).unwrap();
        assert_eq!(many.aud.len(), 2);
    }

    #[test]
    fn test_fresh_omitted_when_unset() {
        let claims: JwtClaims = serde_json::from_value(claims_json("auth:access".into())).unwrap();
        assert_eq!(claims.fresh, None);
        assert!(!claims.is_fresh());

        let encoded = serde_json::to_value(&claims).unwrap();
        assert!(encoded.get("fresh").is_none());
        assert_eq!(encoded["type"], "access");
    }

    #[test]
    fn test_unknown_token_type_rejected() {
        let mut raw = claims_json("auth:access".into());
        raw["type"] = "session".into();
        assert!(serde_json::from_value::<JwtClaims>(raw).is_err());
    }

    #[test]
    fn test_new_access_token_limits() {
        let token = NewAccessToken {
            token_jti: "a".repeat(TOKEN_IDENTIFIER_MAX_LEN + 1),
            csrf: "csrf".to_string(),
            user_id: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        assert!(token.validate().is_err());
    }
}
