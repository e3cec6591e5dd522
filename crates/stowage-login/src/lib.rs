//! Interactive OAuth2 login for stowage registries and services.
//!
//! This crate mints and refreshes identity tokens for an issuer:
//! - a refresh-token fast path against the token endpoint
//! - a browser-based PKCE authorization-code flow with a loopback callback
//! - a manual paste fallback for shells where no listener can bind
//!
//! The flow is three cooperating threads (callback server, stdin prompt,
//! interrupt handler) joined by one channel; the first completed exchange
//! wins and the rest observe cancellation.
//!
//! # Example
//!
//! ```no_run
//! use stowage_login::{IdpType, LoginConfig, LoginHandler};
//!
//! let mut config = LoginConfig::for_issuer("https://uaa.example.com", "stowage-cli", IdpType::Uaa);
//! config.refresh_token = Some("stored-refresh-token".to_string());
//!
//! let token = LoginHandler::new(config).login().expect("login");
//! println!("{}", token.access_token);
//! ```

mod handler;
mod issuers;
mod pkce;
mod token;

pub use handler::{
    DEFAULT_CALLBACK_PATH, DEFAULT_LISTEN_ADDR, LoginConfig, LoginHandler,
    OAUTH_LISTENER_PORT_ENV,
};
pub use issuers::{IssuerEndpoints, endpoints_for, well_known_idp_type};
pub use pkce::{PkcePair, generate_state};
pub use token::{Claims, ID_TOKEN_TYPE, IdpType, Token, is_expired, is_expired_at, parse_claims};
