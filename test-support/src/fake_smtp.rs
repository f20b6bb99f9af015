use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{
    sync::watch::{self, error::RecvError, Receiver, Sender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

/// One message accepted by the fake relay, reduced to the parts the contact
/// tests assert on.
#[derive(Clone, Debug, Default)]
pub struct DeliveredMail {
    pub subject: String,
    pub reply_to: String,
    pub body: String,
}

impl DeliveredMail {
    fn parse(raw: &str) -> Self {
        let (headers, body) = raw
            .split_once("\r\n\r\n")
            .or_else(|| raw.split_once("\n\n"))
            .unwrap_or((raw, ""));
        let mut mail = DeliveredMail {
            body: body.into(),
            ..Default::default()
        };
        for line in headers.lines() {
            if let Some(value) = line.strip_prefix("Subject: ") {
                mail.subject = value.trim().into();
            } else if let Some(value) = line.strip_prefix("Reply-To: ") {
                mail.reply_to = value.trim().into();
            }
        }
        mail
    }
}

// Accepts every message and publishes the parsed delivery.
#[derive(Clone)]
struct RecordingHandler {
    data: Vec<u8>,
    deliveries: Arc<Sender<DeliveredMail>>,
}

impl Handler for RecordingHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.data.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let raw = String::from_utf8_lossy(&self.data).into_owned();
        self.data.clear();
        debug!("Delivery received:\n{raw}");
        self.deliveries.send(DeliveredMail::parse(&raw)).unwrap();
        mailin_embedded::response::OK
    }
}

/// Recording SMTP server for the mail relay under test. Runs on a dedicated
/// thread; parsed messages are retrieved through
/// [`FakeSmtpServer::last_delivery`].
pub struct FakeSmtpServer {
    server: std::sync::Mutex<Option<Server<RecordingHandler>>>,
    deliveries: tokio::sync::Mutex<Receiver<DeliveredMail>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(DeliveredMail::default());
        let handler = RecordingHandler {
            data: Vec::new(),
            deliveries: Arc::new(sender),
        };
        Self {
            server: std::sync::Mutex::new(Some(new_server(handler, SMTP_PORT))),
            deliveries: tokio::sync::Mutex::new(receiver),
        }
    }

    pub fn start(&self) {
        let mut guard = self.server.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    /// Waits for the next delivery and returns it parsed.
    pub async fn last_delivery(&self) -> Result<DeliveredMail, RecvError> {
        let mut receiver = self.deliveries.lock().await;
        receiver.changed().await?;
        let mail = receiver.borrow_and_update().clone();
        drop(receiver);
        Ok(mail)
    }

    /// Discards a delivery still buffered from an earlier test.
    pub async fn flush(&self) {
        let mut receiver = self.deliveries.lock().await;
        let _ = timeout(Duration::from_millis(100), receiver.changed()).await;
    }

    pub fn setup_environment() {
        std::env::set_var("SMTP_URL", format!("smtp://localhost:{SMTP_PORT}"));
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct RejectingHandler;

impl Handler for RejectingHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// SMTP server which rejects every session, for exercising relay failures.
pub fn start_poisoned_smtp_server() {
    let server = new_server(RejectingHandler, POISONED_SMTP_PORT);
    std::thread::spawn(move || {
        let _ = server.serve();
    });
}

fn new_server<H: Handler + Clone + Send>(handler: H, port: u16) -> Server<H> {
    let mut server = Server::new(handler);
    server
        .with_name("contact.example.com")
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("0.0.0.0:{port}"))
        .unwrap();
    server
}
