use axum::http::{header, HeaderValue, Method};
use lettre::message::Mailbox;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SMTP_PORT: u16 = 465;
const FROM_NAME: &str = "Formulario de contacto";

/// Server configuration, read once from the environment at startup.
pub struct Config {
    pub smtp_url: String,
    pub smtp_credentials: Option<(String, String)>,
    pub mail_from: Mailbox,
    pub mail_to: Mailbox,
    pub recaptcha_secret: String,
    pub allowed_origins: AllowedOrigins,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // SMTP_URL takes precedence; otherwise the URL is assembled from the
        // host/port/secure-flag triple.
        let smtp_url = match std::env::var("SMTP_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = require("SMTP_HOST")?;
                let port = match std::env::var("SMTP_PORT") {
                    Ok(value) => value
                        .parse::<u16>()
                        .map_err(|_| ConfigError::Invalid("SMTP_PORT"))?,
                    Err(_) => DEFAULT_SMTP_PORT,
                };
                let secure = std::env::var("SMTP_SECURE")
                    .map(|value| value == "true")
                    .unwrap_or(true);
                let scheme = if secure { "smtps" } else { "smtp" };
                format!("{scheme}://{host}:{port}")
            }
        };
        let smtp_credentials = match (std::env::var("SMTP_USER"), std::env::var("SMTP_PASS")) {
            (Ok(username), Ok(password)) => Some((username, password)),
            _ => None,
        };
        let mail_to = parse_mailbox("MAIL_TO", require("MAIL_TO")?)?;
        // The from address defaults to the SMTP username, which most relays
        // require anyway.
        let mail_from = match std::env::var("MAIL_FROM") {
            Ok(value) => parse_mailbox("MAIL_FROM", value)?,
            Err(_) => {
                let Some((username, _)) = smtp_credentials.as_ref() else {
                    return Err(ConfigError::Missing("MAIL_FROM"));
                };
                parse_mailbox("MAIL_FROM", format!("{FROM_NAME} <{username}>"))?
            }
        };
        let recaptcha_secret = require("RECAPTCHA_SECRET_KEY")?;
        let allowed_origins =
            AllowedOrigins::parse(&std::env::var("ALLOW_ORIGIN").unwrap_or_else(|_| "*".into()))?;
        let port = match std::env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("PORT"))?,
            Err(_) => DEFAULT_PORT,
        };
        Ok(Self {
            smtp_url,
            smtp_credentials,
            mail_from,
            mail_to,
            recaptcha_secret,
            allowed_origins,
            port,
        })
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse_mailbox(key: &'static str, value: String) -> Result<Mailbox, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid(key))
}

/// CORS origin allow-list from the comma-separated `ALLOW_ORIGIN` variable.
/// A `*` entry (or an empty list) allows any origin.
pub enum AllowedOrigins {
    Any,
    List(Vec<HeaderValue>),
}

impl AllowedOrigins {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        let entries: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();
        if entries.is_empty() || entries.contains(&"*") {
            return Ok(Self::Any);
        }
        let mut origins = Vec::new();
        for entry in entries {
            let origin =
                HeaderValue::from_str(entry).map_err(|_| ConfigError::Invalid("ALLOW_ORIGIN"))?;
            origins.push(origin);
        }
        Ok(Self::List(origins))
    }

    pub fn to_cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        match self {
            AllowedOrigins::Any => layer.allow_origin(Any),
            AllowedOrigins::List(origins) => {
                layer.allow_origin(AllowOrigin::list(origins.iter().cloned()))
            }
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "Missing environment variable {key}"),
            ConfigError::Invalid(key) => write!(f, "Invalid value for environment variable {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}
