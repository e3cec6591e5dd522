use std::collections::HashMap;
use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::pkce::{PkcePair, generate_state};
use crate::token::{IdpType, Token, TokenResponse, parse_claims};

/// Environment variable pinning the loopback listener port.
pub const OAUTH_LISTENER_PORT_ENV: &str = "STOWAGE_OAUTH_LOCAL_LISTENER_PORT";

/// Default listener address: loopback, OS-assigned port.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Default callback path on the loopback listener.
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Everything the login flow needs to know about an issuer and a client.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Issuer base URL, also used for the best-effort org lookup.
    pub issuer: String,
    /// Authorization-code endpoint.
    pub auth_url: String,
    /// Token-exchange endpoint.
    pub token_url: String,
    /// OAuth2 client identifier.
    pub client_id: String,
    /// OAuth2 client secret, for issuers that require one.
    pub client_secret: Option<String>,
    /// Listener address; `None` means [`DEFAULT_LISTEN_ADDR`]. The
    /// [`OAUTH_LISTENER_PORT_ENV`] variable overrides both.
    pub listen_addr: Option<String>,
    /// Callback path on the listener.
    pub callback_path: String,
    /// When present, refresh is tried before any interactive flow.
    pub refresh_token: Option<String>,
    /// Organization to log in to, appended as `orgId` on the auth URL.
    pub org_id: Option<String>,
    /// Issuer family, driving claim names and the org lookup.
    pub idp_type: IdpType,
    /// Never attempt browser login; fail if refresh fails.
    pub suppress_interactive: bool,
}

impl LoginConfig {
    /// Configuration for an issuer using its family's endpoint conventions.
    pub fn for_issuer(issuer: &str, client_id: &str, idp_type: IdpType) -> Self {
        let endpoints = crate::issuers::endpoints_for(issuer, idp_type);
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            auth_url: endpoints.auth_url,
            token_url: endpoints.token_url,
            client_id: client_id.to_string(),
            client_secret: None,
            listen_addr: None,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            refresh_token: None,
            org_id: None,
            idp_type,
            suppress_interactive: false,
        }
    }
}

type PromptFn = dyn Fn(&str) -> Result<String> + Send + Sync;
type TtyFn = dyn Fn() -> bool + Send + Sync;
type BrowserFn = dyn Fn(&str) -> Result<()> + Send + Sync;

/// The interactive login flow: refresh fast path, then browser + loopback
/// callback with a manual-paste fallback.
///
/// Collaborators (HTTP client, terminal prompt, TTY probe, browser opener)
/// are injected so tests can swap them; nothing here is process-global.
pub struct LoginHandler {
    config: LoginConfig,
    http: reqwest::blocking::Client,
    prompt_for_value: Arc<PromptFn>,
    is_tty: Arc<TtyFn>,
    open_browser: Arc<BrowserFn>,
    handle_interrupt: bool,
}

impl LoginHandler {
    /// Create a handler with the production collaborators: a 30s-timeout
    /// HTTP client, a stderr prompt, the real stdin TTY probe, and the
    /// system browser.
    pub fn new(config: LoginConfig) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self {
            config,
            http,
            prompt_for_value: Arc::new(default_prompt),
            is_tty: Arc::new(|| std::io::stdin().is_terminal()),
            open_browser: Arc::new(|url: &str| open::that(url).map_err(Into::into)),
            handle_interrupt: true,
        }
    }

    /// Replace the HTTP client.
    pub fn with_http_client(mut self, http: reqwest::blocking::Client) -> Self {
        self.http = http;
        self
    }

    /// Replace the terminal prompt used for the manual-paste fallback.
    pub fn with_prompt<F>(mut self, prompt: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.prompt_for_value = Arc::new(prompt);
        self
    }

    /// Replace the stdin-is-a-terminal probe.
    pub fn with_is_tty<F>(mut self, is_tty: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_tty = Arc::new(is_tty);
        self
    }

    /// Replace the browser opener.
    pub fn with_browser<F>(mut self, open_browser: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.open_browser = Arc::new(open_browser);
        self
    }

    /// Enable or disable the process-wide SIGINT handler for this flow.
    pub fn with_interrupt_handler(mut self, handle_interrupt: bool) -> Self {
        self.handle_interrupt = handle_interrupt;
        self
    }

    /// Obtain a fresh token: refresh fast path first, then the interactive
    /// browser/paste flow unless suppressed.
    pub fn login(&self) -> Result<Token> {
        let refresh_token = self
            .config
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty());

        if let Some(refresh_token) = refresh_token {
            match self.refresh(&refresh_token) {
                Ok(token) => {
                    self.announce_org(&token);
                    return Ok(token);
                }
                Err(err) if self.config.suppress_interactive => {
                    return Err(
                        err.context("token refresh failed and interactive login is suppressed")
                    );
                }
                Err(err) => {
                    eprintln!("token refresh failed, falling back to browser login: {err:#}");
                }
            }
        } else if self.config.suppress_interactive {
            anyhow::bail!("interactive login is suppressed and no refresh token is available");
        }

        self.interactive_login()
    }

    /// Exchange a refresh token for a fresh token pair.
    pub fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .with_context(|| format!("token refresh request to {} failed", self.config.token_url))?;
        parse_token_response(response).context("token refresh failed")
    }

    fn interactive_login(&self) -> Result<Token> {
        let pkce = PkcePair::generate();
        let state = generate_state();

        let listen_addr = resolve_listen_addr(self.config.listen_addr.as_deref());
        let server = match tiny_http::Server::http(listen_addr.as_str()) {
            Ok(server) => Some(Arc::new(server)),
            Err(err) => {
                if !(self.is_tty)() {
                    anyhow::bail!(
                        "cannot bind the login callback listener on {listen_addr} ({err}) \
                         and stdin is not a terminal; use a refresh token or an interactive shell"
                    );
                }
                None
            }
        };

        let redirect_uri = match &server {
            Some(server) => {
                let addr = server
                    .server_addr()
                    .to_ip()
                    .context("callback listener reported no ip address")?;
                format!("http://{addr}{}", self.config.callback_path)
            }
            // No listener: the manual-paste path carries the exchange, but
            // the issuer still requires a syntactically valid redirect.
            None => format!("http://{listen_addr}{}", self.config.callback_path),
        };

        let auth_url = auth_code_url(&self.config, &pkce.challenge, &state, &redirect_uri)?;

        let exchanger = TokenExchanger {
            http: self.http.clone(),
            token_url: self.config.token_url.clone(),
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            redirect_uri,
            verifier: pkce.verifier.clone(),
        };

        let (tx, rx) = mpsc::channel::<Result<Token>>();
        let done = Arc::new(AtomicBool::new(false));

        if let Some(server) = server.clone() {
            let callback_path = self.config.callback_path.clone();
            let exchanger = exchanger.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                serve_callback(&server, &callback_path, &state, &exchanger, &tx);
            });
        }

        if self.handle_interrupt {
            let tx = tx.clone();
            let done = done.clone();
            // Registration fails if a handler already exists; the first one
            // keeps working for the whole process, so that is not fatal.
            let _ = ctrlc::set_handler(move || {
                if !done.load(Ordering::SeqCst) {
                    let _ = tx.send(Err(anyhow::anyhow!("login interrupted")));
                }
            });
        }

        eprintln!("Opening the browser for login. If nothing happens, visit:\n  {auth_url}");
        if let Err(err) = (self.open_browser)(auth_url.as_str()) {
            eprintln!("could not open a browser ({err:#}); use the URL above");
        }

        if (self.is_tty)() {
            let prompt = self.prompt_for_value.clone();
            let exchanger = exchanger.clone();
            let tx = tx.clone();
            let done = done.clone();
            thread::spawn(move || {
                let message =
                    "Paste the authorization code if the browser redirect did not complete: ";
                if let Ok(code) = prompt(message) {
                    let code = code.trim().to_string();
                    if !code.is_empty() && !done.load(Ordering::SeqCst) {
                        let outcome = exchanger.exchange(&code);
                        if !done.load(Ordering::SeqCst) {
                            let _ = tx.send(outcome);
                        }
                    }
                }
            });
        }

        // First outcome wins: callback exchange, pasted-code exchange, or
        // interrupt. The done flag plus unblock() retire the losers; a
        // prompt thread parked on stdin is released at process exit and its
        // late result is discarded.
        let outcome = rx.recv().context("login ended without an outcome")?;
        done.store(true, Ordering::SeqCst);
        if let Some(server) = &server {
            server.unblock();
        }

        let token = outcome?;
        self.announce_org(&token);
        Ok(token)
    }

    fn announce_org(&self, token: &Token) {
        if self.config.idp_type != IdpType::Csp {
            return;
        }
        let Ok(claims) = parse_claims(&token.id_token, IdpType::Csp) else {
            return;
        };
        if let Some(name) = self.fetch_org_name(&token.access_token, &claims.org_id) {
            eprintln!("Logged in to organization {name} ({})", claims.org_id);
        }
    }

    fn fetch_org_name(&self, access_token: &str, org_id: &str) -> Option<String> {
        if org_id.is_empty() {
            return None;
        }
        let url = format!("{}/orgs/{org_id}", self.config.issuer.trim_end_matches('/'));
        let response = self.http.get(url).bearer_auth(access_token).send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().ok()?;
        body.get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Clone)]
struct TokenExchanger {
    http: reqwest::blocking::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    verifier: String,
}

impl TokenExchanger {
    fn exchange(&self, code: &str) -> Result<Token> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("client_id", self.client_id.clone()),
            ("code_verifier", self.verifier.clone()),
            ("redirect_uri", self.redirect_uri.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .with_context(|| format!("token exchange request to {} failed", self.token_url))?;
        parse_token_response(response).context("token exchange failed")
    }
}

fn parse_token_response(response: reqwest::blocking::Response) -> Result<Token> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        anyhow::bail!("token endpoint returned {status}: {}", body.trim());
    }
    let parsed: TokenResponse = response.json().context("failed to parse token response")?;
    Ok(Token::from_response(parsed))
}

/// One callback server loop. The delivered-token mutex makes a duplicate
/// browser delivery an empty success instead of a second exchange.
fn serve_callback(
    server: &tiny_http::Server,
    callback_path: &str,
    expected_state: &str,
    exchanger: &TokenExchanger,
    tx: &mpsc::Sender<Result<Token>>,
) {
    let delivered: Mutex<Option<Token>> = Mutex::new(None);

    for request in server.incoming_requests() {
        let url = match Url::parse(&format!("http://callback.invalid{}", request.url())) {
            Ok(url) => url,
            Err(_) => {
                respond(request, 400, "malformed callback request");
                continue;
            }
        };
        if url.path() != callback_path {
            respond(request, 404, "not found");
            continue;
        }

        let mut guard = delivered.lock().expect("callback mutex poisoned");
        if guard.is_some() {
            let _ = request.respond(tiny_http::Response::empty(200));
            continue;
        }

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let state = query.get("state").map(String::as_str).unwrap_or_default();
        if state != expected_state {
            respond(request, 403, "state mismatch: authorization response rejected");
            continue;
        }
        let Some(code) = query.get("code").filter(|code| !code.is_empty()) else {
            respond(request, 400, "authorization response carried no code");
            continue;
        };

        match exchanger.exchange(code) {
            Ok(token) => {
                *guard = Some(token.clone());
                respond(
                    request,
                    200,
                    "Login successful. You may close this window and return to the terminal.",
                );
                let _ = tx.send(Ok(token));
            }
            Err(err) => {
                respond(request, 502, "token exchange failed; check the terminal");
                let _ = tx.send(Err(err));
            }
        }
    }
}

fn respond(request: tiny_http::Request, status: u16, body: &str) {
    let _ = request.respond(tiny_http::Response::from_string(body).with_status_code(status));
}

fn default_prompt(message: &str) -> Result<String> {
    eprint!("{message}");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// The effective listener address: env pin, then config, then the default.
pub(crate) fn resolve_listen_addr(configured: Option<&str>) -> String {
    if let Ok(port) = std::env::var(OAUTH_LISTENER_PORT_ENV)
        && !port.trim().is_empty()
    {
        return format!("127.0.0.1:{}", port.trim());
    }
    configured
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
}

/// Compose the authorization URL: PKCE challenge, CSRF state, redirect, and
/// the optional `orgId`.
pub(crate) fn auth_code_url(
    config: &LoginConfig,
    challenge: &str,
    state: &str,
    redirect_uri: &str,
) -> Result<Url> {
    let mut url = Url::parse(&config.auth_url)
        .with_context(|| format!("invalid authorization url: {}", config.auth_url))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state)
        .append_pair("redirect_uri", redirect_uri);
    if let Some(org_id) = &config.org_id {
        url.query_pairs_mut().append_pair("orgId", org_id);
    }
    Ok(url)
}
