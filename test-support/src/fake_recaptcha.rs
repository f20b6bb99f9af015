use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::net::TcpListener;

const RECAPTCHA_PORT: u16 = 5283;
const VERIFY_PATH: &str = "/siteverify";

/// In-process stand-in for the reCAPTCHA siteverify endpoint. By default any
/// token verifies; `require_token` restricts success to one specific token.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    failure_codes: Vec<String>,
    return_invalid_response: bool,
}

#[derive(Deserialize)]
struct VerifyRequest {
    secret: String,
    response: String,
    #[allow(dead_code)]
    remoteip: Option<String>,
}

#[derive(Serialize)]
struct VerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", skip_serializing_if = "Vec::is_empty")]
    error_codes: Vec<String>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            failure_codes: vec!["invalid-input-response".into()],
            return_invalid_response: false,
        }
    }

    pub fn setup_environment() {
        std::env::set_var(
            "RECAPTCHA_VERIFY_URL",
            format!("http://localhost:{RECAPTCHA_PORT}{VERIFY_PATH}"),
        );
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    /// Binds the listener before returning so that a request issued right
    /// after this call cannot be refused.
    pub async fn start(self) {
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        let listener = TcpListener::bind(("0.0.0.0", RECAPTCHA_PORT)).await.unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequest>,
) -> Response {
    if state.return_invalid_response {
        return (StatusCode::OK, "This is not JSON").into_response();
    }
    if payload.secret != state.required_secret {
        return Json(VerifyResponse {
            success: false,
            error_codes: vec!["invalid-input-secret".into()],
        })
        .into_response();
    }
    if let Some(required_token) = &state.required_token {
        if &payload.response != required_token {
            return Json(VerifyResponse {
                success: false,
                error_codes: state.failure_codes.clone(),
            })
            .into_response();
        }
    }
    Json(VerifyResponse {
        success: true,
        error_codes: vec![],
    })
    .into_response()
}
