use reqwest::Client;
use serde::Deserialize;
use std::borrow::Cow;

const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Client for the reCAPTCHA v2 siteverify endpoint.
pub struct RecaptchaVerifier {
    secret: String,
    client: Client,
}

impl RecaptchaVerifier {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            client: Client::new(),
        }
    }

    /// Verifies one token. Fails closed: transport errors and undecodable
    /// responses reject the submission just like a negative verdict.
    pub async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<(), RecaptchaError> {
        let mut params = vec![("secret", self.secret.as_str()), ("response", token)];
        if let Some(remote_ip) = remote_ip {
            params.push(("remoteip", remote_ip));
        }
        let response = self
            .client
            .post(Self::verification_url().as_ref())
            .form(&params)
            .send()
            .await
            .map_err(RecaptchaError::Transport)?;
        let verdict: SiteverifyResponse = response
            .json()
            .await
            .map_err(RecaptchaError::Transport)?;
        if verdict.success {
            Ok(())
        } else {
            Err(RecaptchaError::Rejected(verdict.error_codes))
        }
    }

    fn verification_url() -> Cow<'static, str> {
        std::env::var("RECAPTCHA_VERIFY_URL")
            .map(Cow::Owned)
            .unwrap_or(RECAPTCHA_VERIFY_URL.into())
    }
}

#[derive(Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Debug)]
pub enum RecaptchaError {
    Transport(reqwest::Error),
    Rejected(Vec<String>),
}

impl std::fmt::Display for RecaptchaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecaptchaError::Transport(error) => {
                write!(f, "Verification request failed: {error}")
            }
            RecaptchaError::Rejected(codes) => {
                write!(f, "Verification rejected: {codes:?}")
            }
        }
    }
}

impl std::error::Error for RecaptchaError {}
