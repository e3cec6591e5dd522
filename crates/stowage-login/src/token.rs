use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use anyhow::{Context, Result};

/// Issuer family, selecting claim-name conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdpType {
    /// Cloud-services-platform issuers: `username`, `perms`, `context_name`.
    #[default]
    Csp,
    /// UAA issuers: `user_name`, `scope`, no org claim.
    Uaa,
}

/// Token type reported for tokens minted by the interactive flows.
pub const ID_TOKEN_TYPE: &str = "id-token";

/// The token tuple returned by a successful login or refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// OpenID Connect identity token.
    pub id_token: String,
    /// OAuth2 access token.
    pub access_token: String,
    /// Refresh token for the next fast-path login, when the issuer grants one.
    pub refresh_token: String,
    /// Seconds until expiry, measured when the token was received.
    pub expires_in: i64,
    /// Token type, always [`ID_TOKEN_TYPE`] for interactive logins.
    pub token_type: String,
    /// Granted scope, as reported by the issuer.
    pub scope: String,
}

/// Wire shape of an issuer token response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) id_token: String,
    #[serde(default)]
    pub(crate) refresh_token: String,
    pub(crate) expires_in: i64,
    #[serde(default)]
    pub(crate) scope: String,
}

impl Token {
    pub(crate) fn from_response(response: TokenResponse) -> Self {
        // ExpiresIn is seconds-until-expiry at receipt, not the issuer's raw
        // lifetime; the elapsed handling time is already subtracted.
        let expiry = Utc::now() + Duration::seconds(response.expires_in);
        let expires_in = expiry.signed_duration_since(Utc::now()).num_seconds();
        Self {
            id_token: response.id_token,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in,
            token_type: ID_TOKEN_TYPE.to_string(),
            scope: response.scope,
        }
    }
}

/// Claims extracted from an identity token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user name.
    pub username: String,
    /// Granted permissions or scopes.
    pub permissions: Vec<String>,
    /// Organization identifier. Empty for UAA issuers, which carry none.
    pub org_id: String,
    /// The full decoded payload, for callers needing custom claims.
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Decode the payload of a JWT without verifying its signature.
///
/// Verification is the resource server's job; the client only needs the
/// claims for display and org selection.
pub fn parse_claims(token: &str, idp_type: IdpType) -> Result<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .context("token is not a JWT: missing payload segment")?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("token payload is not valid base64url")?;
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&decoded).context("token payload is not a JSON object")?;

    let username_claim = match idp_type {
        IdpType::Csp => "username",
        IdpType::Uaa => "user_name",
    };
    let username = raw
        .get(username_claim)
        .and_then(|v| v.as_str())
        .with_context(|| format!("token payload is missing the {username_claim} claim"))?
        .to_string();

    let permissions_claim = match idp_type {
        IdpType::Csp => "perms",
        IdpType::Uaa => "scope",
    };
    let permissions = raw
        .get(permissions_claim)
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let org_id = match idp_type {
        IdpType::Csp => raw
            .get("context_name")
            .and_then(|v| v.as_str())
            .context("token payload is missing the context_name claim")?
            .to_string(),
        IdpType::Uaa => String::new(),
    };

    Ok(Claims {
        username,
        permissions,
        org_id,
        raw,
    })
}

/// Refresh-at-half policy: a token counts as expired once half its original
/// lifetime has elapsed, so refreshes happen well before the hard deadline.
pub fn is_expired(expiry: DateTime<Utc>, lifetime_secs: i64) -> bool {
    is_expired_at(expiry, lifetime_secs, Utc::now())
}

/// [`is_expired`] against an explicit clock.
pub fn is_expired_at(expiry: DateTime<Utc>, lifetime_secs: i64, now: DateTime<Utc>) -> bool {
    now >= expiry - Duration::seconds(lifetime_secs / 2)
}
