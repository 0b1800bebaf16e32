use serde::Deserialize;
use std::path::Path;

/// Top-level configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
    pub store: StoreConfig,
    pub google: ProviderConfig,
    pub line: ProviderConfig,
}

/// Server-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub public_url: String,
    /// Base64 secret used for HMAC-signing session tokens.
    pub signing_secret: String,
    /// Lifetime of issued session tokens (seconds).
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
    /// Upper bound for every outbound provider call (seconds).
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// One year.
const MAX_SESSION_TTL: u64 = 365 * 24 * 60 * 60;
/// One day; login state only has to survive the trip to the provider.
const MAX_STATE_TTL: u64 = 24 * 60 * 60;

fn default_session_ttl() -> u64 {
    86_400
}

fn default_http_timeout() -> u64 {
    5
}

/// Where protected requests carry their session token.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    Cookie,
    Header,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_carrier")]
    pub carrier: CarrierKind,
    #[serde(default = "default_carrier_name")]
    pub name: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            carrier: default_carrier(),
            name: default_carrier_name(),
        }
    }
}

fn default_carrier() -> CarrierKind {
    CarrierKind::Cookie
}

fn default_carrier_name() -> String {
    "access_token".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Ephemeral store used for the OAuth state handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: String,
    /// How long an authorization state stays redeemable (seconds).
    #[serde(default = "default_state_ttl")]
    pub state_ttl: u64,
    /// Upper bound for a single store round-trip (seconds).
    #[serde(default = "default_store_timeout")]
    pub timeout: u64,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_state_ttl() -> u64 {
    300
}

fn default_store_timeout() -> u64 {
    3
}

/// One redirect URI per flow purpose.
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectUris {
    pub sign_in: String,
    pub sign_up: String,
    pub delete: String,
}

/// Credentials and endpoints for a single identity provider.
///
/// Endpoint fields left empty fall back to the provider's public endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub redirect_uris: RedirectUris,
    #[serde(default)]
    pub authorize_url: String,
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub profile_url: String,
    #[serde(default)]
    pub revoke_url: String,
}

/// Load and validate config from a TOML file, applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    parse_config(&content)
}

/// Parse, override and validate config from TOML text.
pub fn parse_config(content: &str) -> Result<Config, String> {
    let mut config: Config =
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML config: {e}"))?;

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

impl ServerConfig {
    /// The signing secret as raw bytes. Only valid after validation.
    pub fn signing_key_bytes(&self) -> Result<Vec<u8>, String> {
        base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &self.signing_secret,
        )
        .map_err(|e| format!("server.signing_secret is not valid base64: {e}"))
    }

    /// Cookies are only marked `Secure` when the public URL is HTTPS.
    pub fn is_https(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SESSION_GATE_SIGNING_SECRET") {
        config.server.signing_secret = val;
    }
    if let Ok(val) = std::env::var("SESSION_GATE_REDIS_URL") {
        config.store.url = val;
    }
    if let Ok(val) = std::env::var("SESSION_GATE_GOOGLE_CLIENT_SECRET") {
        config.google.client_secret = val;
    }
    if let Ok(val) = std::env::var("SESSION_GATE_LINE_CLIENT_SECRET") {
        config.line.client_secret = val;
    }
}

fn validate(config: &Config) -> Result<(), String> {
    validate_server(&config.server)?;
    validate_credential(&config.credential)?;
    validate_store(&config.store)?;
    validate_provider("google", &config.google)?;
    validate_provider("line", &config.line)?;
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), String> {
    if server.public_url.is_empty() {
        return Err("server.public_url is required".to_string());
    }

    if server.public_url.ends_with('/') {
        return Err("server.public_url must not have a trailing slash".to_string());
    }

    // Warn (but allow) http:// for local dev; require https:// otherwise
    if server.public_url.starts_with("http://") {
        tracing::warn!(
            "server.public_url uses http:// — HTTPS is required for production deployments"
        );
    } else if !server.is_https() {
        return Err(
            "server.public_url must start with https:// (or http:// for local dev)".to_string(),
        );
    }

    if server.signing_secret.is_empty() {
        return Err("server.signing_secret is required".to_string());
    }
    let bytes = server.signing_key_bytes()?;
    if bytes.len() < 32 {
        return Err(format!(
            "server.signing_secret must be at least 32 bytes when base64-decoded (got {} bytes). Generate with: openssl rand -base64 32",
            bytes.len()
        ));
    }

    if server.session_ttl == 0 || server.session_ttl > MAX_SESSION_TTL {
        return Err(format!(
            "server.session_ttl must be between 1 and {MAX_SESSION_TTL} seconds"
        ));
    }
    if server.http_timeout == 0 {
        return Err("server.http_timeout must be greater than zero".to_string());
    }

    Ok(())
}

fn validate_credential(credential: &CredentialConfig) -> Result<(), String> {
    let name_regex = regex_lite::Regex::new(r"^[A-Za-z0-9_-]+$")
        .map_err(|e| format!("internal regex error: {e}"))?;
    if !name_regex.is_match(&credential.name) {
        return Err(format!(
            "credential.name '{}' must match ^[A-Za-z0-9_-]+$",
            credential.name
        ));
    }
    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), String> {
    if store.backend == StoreBackend::Redis {
        if store.url.is_empty() {
            return Err("store.url is required for the redis backend".to_string());
        }
        if store.url.starts_with("rediss://") {
            return Err(
                "store.url: rediss:// is not supported by this build; use redis:// behind a TLS tunnel"
                    .to_string(),
            );
        }
        if !store.url.starts_with("redis://") {
            return Err("store.url must start with redis://".to_string());
        }
    }
    if store.state_ttl == 0 || store.state_ttl > MAX_STATE_TTL {
        return Err(format!(
            "store.state_ttl must be between 1 and {MAX_STATE_TTL} seconds"
        ));
    }
    if store.timeout == 0 {
        return Err("store.timeout must be greater than zero".to_string());
    }
    Ok(())
}

fn validate_provider(name: &str, provider: &ProviderConfig) -> Result<(), String> {
    let missing: Vec<&str> = [
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
        ("redirect_uris.sign_in", provider.redirect_uris.sign_in.as_str()),
        ("redirect_uris.sign_up", provider.redirect_uris.sign_up.as_str()),
        ("redirect_uris.delete", provider.redirect_uris.delete.as_str()),
    ]
    .iter()
    .filter(|(_, v)| v.is_empty())
    .map(|(k, _)| *k)
    .collect();

    if !missing.is_empty() {
        return Err(format!("{name}: missing required keys: {}", missing.join(", ")));
    }

    let urls = [
        ("redirect_uris.sign_in", &provider.redirect_uris.sign_in),
        ("redirect_uris.sign_up", &provider.redirect_uris.sign_up),
        ("redirect_uris.delete", &provider.redirect_uris.delete),
        ("authorize_url", &provider.authorize_url),
        ("token_url", &provider.token_url),
        ("profile_url", &provider.profile_url),
        ("revoke_url", &provider.revoke_url),
    ];
    for (key, url) in urls {
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("{name}.{key} must be a valid HTTP(S) URL"));
        }
    }

    let uris = &provider.redirect_uris;
    if uris.sign_in == uris.sign_up || uris.sign_in == uris.delete || uris.sign_up == uris.delete
    {
        return Err(format!(
            "{name}: each purpose needs a distinct redirect URI"
        ));
    }

    Ok(())
}
