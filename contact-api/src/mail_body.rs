use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

const CONTACT_EMAIL_TEMPLATE_NAME: &str = "contact-email-template";
const CONTACT_EMAIL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-email.html"
));

#[derive(Serialize)]
pub struct EmailContext {
    pub name: String,
    pub email: String,
    pub category: String,
    pub client_ip: String,
    pub message: String,
    pub timestamp: String,
}

/// Renders the HTML mail body. The template engine's default formatter escapes
/// HTML in every interpolated value, so user-controlled fields cannot inject
/// markup into the rendered email.
pub fn render_contact_email(context: &EmailContext) -> String {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_paragraphs", render_paragraphs);
    tt.add_template(CONTACT_EMAIL_TEMPLATE_NAME, CONTACT_EMAIL_TEMPLATE)
        .unwrap();
    tt.render(CONTACT_EMAIL_TEMPLATE_NAME, context).unwrap()
}

fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    output.push_str("<p>");
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\n\n", "</p><p>"));
    output.push_str("</p>");
    Ok(())
}
