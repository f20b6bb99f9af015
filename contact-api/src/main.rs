mod config;
mod mail_body;
mod mailer;
mod rate_limit;
mod recaptcha;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use config::Config;
use lettre::{message::Mailbox, Address};
use mail_body::EmailContext;
use mailer::{MailRelay, MailRelayError};
use rate_limit::{Decision, Quota, RateLimiter};
use recaptcha::{RecaptchaError, RecaptchaVerifier};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

const RATE_LIMIT_MAX: u32 = 20;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const MAX_BODY_BYTES: usize = 64 * 1024;
const MESSAGE_MIN_CHARS: usize = 10;
const MESSAGE_MAX_CHARS: usize = 1000;
const SUBJECT_PREFIX: &str = "Contacto web";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    let port = config.port;
    let cors = config.allowed_origins.to_cors_layer();
    let state = Arc::new(AppState::new(
        &config,
        RateLimiter::new(RATE_LIMIT_MAX, RATE_LIMIT_WINDOW),
    )?);

    match state.mailer.verify().await {
        Ok(()) => info!("SMTP relay ready"),
        Err(error) => error!("SMTP relay verification failed: {error}"),
    }

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_WINDOW);
        loop {
            interval.tick().await;
            sweep_state.limiter.sweep();
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Contact API listening on port {port}");
    axum::serve(
        listener,
        app(state, cors).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/contact", post(contact))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

struct AppState {
    mailer: MailRelay,
    verifier: RecaptchaVerifier,
    limiter: RateLimiter,
}

impl AppState {
    fn new(config: &Config, limiter: RateLimiter) -> Result<Self, MailRelayError> {
        Ok(Self {
            mailer: MailRelay::connect(config)?,
            verifier: RecaptchaVerifier::new(config.recaptcha_secret.clone()),
            limiter,
        })
    }

    async fn process(
        &self,
        payload: Option<&ContactFormMessage>,
        client_ip: &str,
    ) -> Result<(), ContactFormError> {
        let Some(message) = payload else {
            return Err(ContactFormError::Validation(
                "Campos requeridos faltantes".into(),
            ));
        };
        let submission = message.validate()?;
        self.verifier
            .verify(submission.token, Some(client_ip))
            .await
            .map_err(ContactFormError::Captcha)?;
        let html_body = mail_body::render_contact_email(&EmailContext {
            name: submission.name.into(),
            email: submission.email.into(),
            category: submission.category.as_str().into(),
            client_ip: client_ip.into(),
            message: submission.message.into(),
            timestamp: Utc::now().to_rfc3339(),
        });
        let subject = format!("{SUBJECT_PREFIX} - {}", submission.category.as_str());
        self.mailer
            .send(submission.reply_to, &subject, html_body)
            .await
            .map_err(ContactFormError::MailRelay)?;
        Ok(())
    }
}

async fn contact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Option<Json<ContactFormMessage>>,
) -> Response {
    let client_ip = client_ip(&headers, peer);
    let quota = match state.limiter.check(&client_ip) {
        Decision::Limited(quota) => {
            let error = ContactFormError::RateLimited;
            error.log();
            return with_quota_headers(error.into_response(), &quota);
        }
        Decision::Allowed(quota) => quota,
    };
    let response = match state.process(payload.as_deref(), &client_ip).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(error) => {
            error.log();
            error.into_response()
        }
    };
    with_quota_headers(response, &quota)
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let time = Utc::now().to_rfc3339();
    match state.mailer.verify().await {
        Ok(()) => Json(json!({ "ok": true, "smtp": "ok", "time": time })).into_response(),
        Err(smtp_error) => {
            error!("SMTP health check failed: {smtp_error}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "ok": false,
                    "smtp": "fail",
                    "error": smtp_error.to_string(),
                    "time": time,
                })),
            )
                .into_response()
        }
    }
}

// First entry of X-Forwarded-For when the server sits behind a proxy,
// otherwise the peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn with_quota_headers(mut response: Response, quota: &Quota) -> Response {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(quota.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(quota.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(quota.reset));
    response
}

#[derive(Deserialize, Debug)]
struct ContactFormMessage {
    name: Option<String>,
    email: Option<String>,
    #[serde(rename = "type")]
    category: Option<String>,
    message: Option<String>,
    recaptcha: Option<String>,
}

impl ContactFormMessage {
    fn validate(&self) -> Result<ValidatedSubmission, ContactFormError> {
        let ContactFormMessage {
            name: Some(name),
            email: Some(email),
            category: Some(category),
            message: Some(message),
            recaptcha: Some(recaptcha),
        } = self
        else {
            return Err(ContactFormError::Validation(
                "Campos requeridos faltantes".into(),
            ));
        };
        let (name, email, recaptcha) = (name.trim(), email.trim(), recaptcha.trim());
        if name.is_empty() || email.is_empty() || recaptcha.is_empty() {
            return Err(ContactFormError::Validation(
                "Campos requeridos faltantes".into(),
            ));
        }
        if !email_regex().is_match(email) {
            return Err(ContactFormError::Validation("Correo inválido".into()));
        }
        let Ok(address) = email.parse::<Address>() else {
            return Err(ContactFormError::Validation("Correo inválido".into()));
        };
        let Ok(category) = category.trim().parse() else {
            return Err(ContactFormError::Validation("Tipo inválido".into()));
        };
        let message = message.trim();
        if !(MESSAGE_MIN_CHARS..=MESSAGE_MAX_CHARS).contains(&message.chars().count()) {
            return Err(ContactFormError::Validation(
                "Mensaje debe tener entre 10 y 1000 caracteres".into(),
            ));
        }
        Ok(ValidatedSubmission {
            reply_to: Mailbox::new(Some(name.into()), address),
            name,
            email,
            category,
            message,
            token: recaptcha,
        })
    }
}

struct ValidatedSubmission<'a> {
    name: &'a str,
    email: &'a str,
    category: Category,
    message: &'a str,
    token: &'a str,
    reply_to: Mailbox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Pregunta,
    Sugerencia,
    Otro,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::Pregunta => "pregunta",
            Category::Sugerencia => "sugerencia",
            Category::Otro => "otro",
        }
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pregunta" => Ok(Category::Pregunta),
            "sugerencia" => Ok(Category::Sugerencia),
            "otro" => Ok(Category::Otro),
            _ => Err(()),
        }
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| Regex::new(r"(?i)^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

#[derive(Debug)]
enum ContactFormError {
    Validation(String),
    RateLimited,
    Captcha(RecaptchaError),
    MailRelay(MailRelayError),
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::Validation(description) => {
                info!("Rejected contact form submission: {description}");
            }
            ContactFormError::RateLimited => {
                info!("Rejected contact form submission: rate limit exceeded");
            }
            ContactFormError::Captcha(cause) => {
                error!("reCAPTCHA verification failed: {cause}");
            }
            ContactFormError::MailRelay(cause) => {
                error!("Error relaying contact message: {cause}");
            }
        }
    }

    // Captcha and relay detail stays in the server log; the caller only sees
    // a generic message.
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ContactFormError::Validation(description) => (StatusCode::BAD_REQUEST, description),
            ContactFormError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".into())
            }
            ContactFormError::Captcha(_) => (StatusCode::BAD_REQUEST, "reCAPTCHA inválido".into()),
            ContactFormError::MailRelay(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No se pudo enviar el correo".into(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl std::fmt::Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::Validation(description) => {
                write!(f, "Validation error: {description}")
            }
            ContactFormError::RateLimited => write!(f, "Rate limit exceeded"),
            ContactFormError::Captcha(cause) => write!(f, "CAPTCHA error: {cause}"),
            ContactFormError::MailRelay(cause) => write!(f, "Mail relay error: {cause}"),
        }
    }
}

impl std::error::Error for ContactFormError {}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use googletest::prelude::*;
    use http_body_util::BodyExt;
    use serde::Serialize;
    use serial_test::serial;
    use test_support::{
        fake_recaptcha::FakeRecaptcha,
        fake_smtp::{start_poisoned_smtp_server, DeliveredMail, FakeSmtpServer, POISONED_SMTP_PORT},
        setup_logging,
    };
    use tokio::time::timeout;
    use tower::ServiceExt;

    const CORRECT_TOKEN: &str = "correct recaptcha token";
    const FAKE_RECAPTCHA_SECRET: &str = "arbitrary recaptcha secret";

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_ok_and_relays_message_when_captcha_passes() {
        init().await;
        FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .require_token(CORRECT_TOKEN)
            .start()
            .await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(200));
        let body = response_json(response).await;
        expect_that!(body["ok"].as_bool(), some(eq(true)));
        let mail = timeout(Duration::from_secs(1), fake_smtp().last_delivery()).await;
        expect_that!(
            mail,
            ok(ok(matches_pattern!(DeliveredMail {
                subject: eq("Contacto web - pregunta"),
                reply_to: contains_substring("ana@example.com"),
                body: contains_substring("Hola, quiero"),
            })))
        );
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn escapes_html_in_the_relayed_message() {
        init().await;
        FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET).start().await;
        let app = test_app(RATE_LIMIT_MAX).await;
        let payload =
            Payload::arbitrary().with_message("<script>doEvil();</script>Hola desde la web");

        let response = app.oneshot(payload.into_request()).await.unwrap();

        expect_that!(response.status().as_u16(), eq(200));
        let mail = timeout(Duration::from_secs(1), fake_smtp().last_delivery()).await;
        expect_that!(
            mail,
            ok(ok(matches_pattern!(DeliveredMail {
                subject: anything(),
                reply_to: anything(),
                body: contains_substring("&lt;script&gt;").and(not(contains_substring("<script>"))),
            })))
        );
    }

    #[tokio::test]
    #[serial]
    async fn sets_rate_limit_headers_on_the_response() -> Result<()> {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app.oneshot(Payload::empty().into_request()).await.unwrap();

        verify_that!(response.headers().get("X-RateLimit-Limit"), some(eq("20")))?;
        verify_that!(
            response.headers().get("X-RateLimit-Remaining"),
            some(eq("19"))
        )?;
        verify_that!(
            response.headers().get("X-RateLimit-Reset").is_some(),
            eq(true)
        )
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_when_required_fields_are_missing() {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().without_recaptcha().into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        let body = response_json(response).await;
        expect_that!(
            body["error"].as_str(),
            some(eq("Campos requeridos faltantes"))
        );
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_for_an_invalid_email_address() {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(
                Payload::arbitrary()
                    .with_email("not an address")
                    .into_request(),
            )
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        let body = response_json(response).await;
        expect_that!(body["error"].as_str(), some(eq("Correo inválido")));
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_for_an_unknown_category() {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().with_category("queja").into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        let body = response_json(response).await;
        expect_that!(body["error"].as_str(), some(eq("Tipo inválido")));
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_when_captcha_is_rejected() {
        init().await;
        FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .require_token(CORRECT_TOKEN)
            .start()
            .await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(
                Payload::arbitrary()
                    .with_recaptcha("incorrect recaptcha token")
                    .into_request(),
            )
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        let body = response_json(response).await;
        expect_that!(body["error"].as_str(), some(eq("reCAPTCHA inválido")));
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_when_captcha_service_is_unreachable() {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        let body = response_json(response).await;
        expect_that!(body["error"].as_str(), some(eq("reCAPTCHA inválido")));
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_400_when_captcha_service_answers_gibberish() {
        init().await;
        FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .return_invalid_response()
            .start()
            .await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        expect_no_mail_was_sent().await;
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_429_when_the_rate_limit_is_exhausted() {
        init().await;
        let app = test_app(2).await;
        for _ in 0..2 {
            app.clone()
                .oneshot(Payload::empty().into_request())
                .await
                .unwrap();
        }

        let response = app.oneshot(Payload::empty().into_request()).await.unwrap();

        expect_that!(response.status().as_u16(), eq(429));
        expect_that!(
            response.headers().get("X-RateLimit-Remaining"),
            some(eq("0"))
        );
        let body = response_json(response).await;
        expect_that!(body["error"].as_str(), some(eq("Rate limit exceeded")));
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn returns_500_when_smtp_rejects_the_message() {
        init().await;
        start_poisoned_smtp_server();
        let _env = TemporaryEnv::new("SMTP_URL", format!("smtp://localhost:{POISONED_SMTP_PORT}"));
        FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET).start().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app
            .oneshot(Payload::arbitrary().into_request())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(500));
        let body = response_json(response).await;
        expect_that!(
            body["error"].as_str(),
            some(eq("No se pudo enviar el correo"))
        );
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn health_reports_smtp_ok() {
        init().await;
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app.oneshot(health_request()).await.unwrap();

        expect_that!(response.status().as_u16(), eq(200));
        let body = response_json(response).await;
        expect_that!(body["ok"].as_bool(), some(eq(true)));
        expect_that!(body["smtp"].as_str(), some(eq("ok")));
        expect_that!(body["time"].is_string(), eq(true));
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn health_reports_smtp_failure() {
        init().await;
        let _env = TemporaryEnv::new("SMTP_URL", "smtp://localhost:4570");
        let app = test_app(RATE_LIMIT_MAX).await;

        let response = app.oneshot(health_request()).await.unwrap();

        expect_that!(response.status().as_u16(), eq(500));
        let body = response_json(response).await;
        expect_that!(body["ok"].as_bool(), some(eq(false)));
        expect_that!(body["smtp"].as_str(), some(eq("fail")));
    }

    #[test]
    fn validate_rejects_a_missing_name() -> Result<()> {
        let message = ContactFormMessage {
            name: None,
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Campos requeridos faltantes"))
        )
    }

    #[test]
    fn validate_rejects_a_blank_email() -> Result<()> {
        let message = ContactFormMessage {
            email: Some("   ".into()),
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Campos requeridos faltantes"))
        )
    }

    #[test]
    fn validate_rejects_an_email_without_a_domain() -> Result<()> {
        let message = ContactFormMessage {
            email: Some("ana@localhost".into()),
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Correo inválido"))
        )
    }

    #[test]
    fn validate_rejects_an_unknown_category() -> Result<()> {
        let message = ContactFormMessage {
            category: Some("reclamo".into()),
            ..complete_message()
        };

        verify_that!(error_message(message.validate()), some(eq("Tipo inválido")))
    }

    #[test]
    fn validate_rejects_a_message_of_9_characters() -> Result<()> {
        let message = ContactFormMessage {
            message: Some("a".repeat(9)),
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Mensaje debe tener entre 10 y 1000 caracteres"))
        )
    }

    #[test]
    fn validate_accepts_a_message_of_10_characters() -> Result<()> {
        let message = ContactFormMessage {
            message: Some("a".repeat(10)),
            ..complete_message()
        };

        verify_that!(message.validate().is_ok(), eq(true))
    }

    #[test]
    fn validate_accepts_a_message_of_1000_characters() -> Result<()> {
        let message = ContactFormMessage {
            message: Some("a".repeat(1000)),
            ..complete_message()
        };

        verify_that!(message.validate().is_ok(), eq(true))
    }

    #[test]
    fn validate_rejects_a_message_of_1001_characters() -> Result<()> {
        let message = ContactFormMessage {
            message: Some("a".repeat(1001)),
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Mensaje debe tener entre 10 y 1000 caracteres"))
        )
    }

    #[test]
    fn validate_measures_message_length_after_trimming() -> Result<()> {
        let message = ContactFormMessage {
            message: Some(format!("   {}   ", "a".repeat(9))),
            ..complete_message()
        };

        verify_that!(
            error_message(message.validate()),
            some(eq("Mensaje debe tener entre 10 y 1000 caracteres"))
        )
    }

    fn complete_message() -> ContactFormMessage {
        ContactFormMessage {
            name: Some("Ana".into()),
            email: Some("ana@example.com".into()),
            category: Some("pregunta".into()),
            message: Some("Hola, quiero más información".into()),
            recaptcha: Some(CORRECT_TOKEN.into()),
        }
    }

    fn error_message(
        result: std::result::Result<ValidatedSubmission, ContactFormError>,
    ) -> Option<String> {
        match result {
            Err(ContactFormError::Validation(description)) => Some(description),
            _ => None,
        }
    }

    async fn init() {
        setup_logging();
        setup_environment();
        fake_smtp().start();
        fake_smtp().flush().await;
    }

    fn setup_environment() {
        FakeSmtpServer::setup_environment();
        FakeRecaptcha::setup_environment();
        std::env::set_var("RECAPTCHA_SECRET_KEY", FAKE_RECAPTCHA_SECRET);
        std::env::set_var("MAIL_TO", "Buzón de contacto <contacto@example.com>");
        std::env::set_var("MAIL_FROM", "Formulario de contacto <noreply@example.com>");
        std::env::set_var("ALLOW_ORIGIN", "*");
    }

    async fn test_app(max_requests: u32) -> Router {
        let config = Config::from_env().unwrap();
        let state = Arc::new(
            AppState::new(&config, RateLimiter::new(max_requests, RATE_LIMIT_WINDOW)).unwrap(),
        );
        app(state, config.allowed_origins.to_cors_layer())
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn expect_no_mail_was_sent() {
        expect_that!(
            timeout(Duration::from_secs(1), fake_smtp().last_delivery()).await,
            err(anything())
        );
    }

    fn health_request() -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap()
    }

    #[derive(Serialize)]
    struct Payload {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        recaptcha: Option<String>,
    }

    impl Payload {
        fn arbitrary() -> Self {
            Self {
                name: Some("Ana".into()),
                email: Some("ana@example.com".into()),
                category: Some("pregunta".into()),
                message: Some("Hola, quiero más información".into()),
                recaptcha: Some(CORRECT_TOKEN.into()),
            }
        }

        fn empty() -> Self {
            Self {
                name: None,
                email: None,
                category: None,
                message: None,
                recaptcha: None,
            }
        }

        fn with_email(self, email: impl AsRef<str>) -> Self {
            Self {
                email: Some(email.as_ref().into()),
                ..self
            }
        }

        fn with_category(self, category: impl AsRef<str>) -> Self {
            Self {
                category: Some(category.as_ref().into()),
                ..self
            }
        }

        fn with_message(self, message: impl AsRef<str>) -> Self {
            Self {
                message: Some(message.as_ref().into()),
                ..self
            }
        }

        fn with_recaptcha(self, token: impl AsRef<str>) -> Self {
            Self {
                recaptcha: Some(token.as_ref().into()),
                ..self
            }
        }

        fn without_recaptcha(self) -> Self {
            Self {
                recaptcha: None,
                ..self
            }
        }

        fn into_request(self) -> Request<Body> {
            Request::builder()
                .method("POST")
                .uri("/api/contact")
                .header("Content-Type", "application/json")
                .header("X-Forwarded-For", "203.0.113.50")
                .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
                .body(Body::from(serde_json::to_string(&self).unwrap()))
                .unwrap()
        }
    }

    struct TemporaryEnv(&'static str, Option<String>);

    impl TemporaryEnv {
        fn new(key: &'static str, value: impl AsRef<str>) -> Self {
            let old_value = std::env::var(key).ok();
            std::env::set_var(key, value.as_ref());
            Self(key, old_value)
        }
    }

    impl Drop for TemporaryEnv {
        fn drop(&mut self) {
            if let Some(value) = self.1.as_ref() {
                std::env::set_var(self.0, value);
            } else {
                std::env::remove_var(self.0);
            }
        }
    }

    fn fake_smtp() -> &'static FakeSmtpServer {
        static FAKE_SMTP: OnceLock<FakeSmtpServer> = OnceLock::new();
        FAKE_SMTP.get_or_init(FakeSmtpServer::new)
    }
}
