use crate::token::IdpType;

/// The auth/token endpoint pair for one issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerEndpoints {
    /// Authorization-code endpoint.
    pub auth_url: String,
    /// Token-exchange endpoint.
    pub token_url: String,
    /// Issuer family, driving claim-name conventions.
    pub idp_type: IdpType,
}

/// Well-known issuers and their families. Anything else falls back to the
/// per-family URL conventions with an explicitly chosen [`IdpType`].
const WELL_KNOWN_ISSUERS: [(&str, IdpType); 2] = [
    ("https://auth.stowage.cloud", IdpType::Csp),
    ("https://uaa.stowage.cloud", IdpType::Uaa),
];

/// The issuer family for a well-known issuer URL, if recognized.
pub fn well_known_idp_type(issuer: &str) -> Option<IdpType> {
    let issuer = issuer.trim_end_matches('/');
    WELL_KNOWN_ISSUERS
        .iter()
        .find(|(known, _)| *known == issuer)
        .map(|(_, idp_type)| *idp_type)
}

/// Derive the endpoint pair for an issuer by its family's URL convention.
pub fn endpoints_for(issuer: &str, idp_type: IdpType) -> IssuerEndpoints {
    let issuer = issuer.trim_end_matches('/');
    match idp_type {
        IdpType::Csp => IssuerEndpoints {
            auth_url: format!("{issuer}/authorize"),
            token_url: format!("{issuer}/token"),
            idp_type,
        },
        IdpType::Uaa => IssuerEndpoints {
            auth_url: format!("{issuer}/oauth/authorize"),
            token_url: format!("{issuer}/oauth/token"),
            idp_type,
        },
    }
}
