use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::org::Organisation;

/// Organisation tokens are valid for a year.
pub const TOKEN_TTL: Duration = Duration::days(365);

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OrgClaims {
    pub org_id: String,
    pub org_name: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl OrgClaims {
    pub fn new(org: &Organisation, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            org_id: org.id.to_string(),
            org_name: org.name.clone(),
            exp: (now + ttl).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub organization_id: String,
    pub expires_at: OffsetDateTime,
}

impl IssuedToken {
    pub fn expires_rfc3339(&self) -> String {
        self.expires_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.expires_at.unix_timestamp().to_string())
    }
}

/// HS256 signer and verifier for organisation tokens.
#[derive(Clone)]
pub struct OrgTokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for OrgTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgTokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl OrgTokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl: TOKEN_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sign(&self, claims: &OrgClaims) -> Result<String> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .context("sign organisation token")
    }

    pub fn mint(&self, org: &Organisation) -> Result<IssuedToken> {
        let claims = OrgClaims::new(org, self.ttl);
        let token = self.sign(&claims)?;
        Ok(IssuedToken {
            token,
            organization_id: claims.org_id,
            expires_at: OffsetDateTime::from_unix_timestamp(claims.exp)
                .context("token expiry out of range")?,
        })
    }

    /// Checks the signature and expiry.
    pub fn verify(&self, token: &str) -> Result<OrgClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        let data = decode::<OrgClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn org() -> Organisation {
        Organisation::new("Kenya Helpline", "ops@example.org")
    }

    #[test]
    fn minted_token_verifies_for_a_year() {
        let signer = OrgTokenSigner::new("top-secret");
        let org = org();
        let issued = signer.mint(&org).expect("mint");
        let claims = signer.verify(&issued.token).expect("verify");
        assert_eq!(claims.org_id, org.id.to_string());
        assert_eq!(claims.org_name, "Kenya Helpline");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL.whole_seconds());
        assert_eq!(issued.organization_id, claims.org_id);
    }

    #[test]
    fn wrong_secret_and_expiry_are_rejected() {
        let org = org();
        let token = OrgTokenSigner::new("good").mint(&org).unwrap().token;
        assert!(OrgTokenSigner::new("bad").verify(&token).is_err());

        let expired = OrgTokenSigner::new("good").with_ttl(Duration::seconds(-60));
        let token = expired.mint(&org).unwrap().token;
        assert!(expired.verify(&token).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = OrgTokenSigner::new("secret");
        let token = signer.mint(&org()).unwrap().token;
        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        let payload = URL_SAFE_NO_PAD.decode(&segments[1]).unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        json["org_name"] = "someone else".into();
        segments[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json).unwrap());
        assert!(signer.verify(&segments.join(".")).is_err());
    }
}
