use crate::{config::MailSettings, submission::ValidatedSubmission};
use lettre::{message::Mailbox, Address};
use serde::Serialize;
use serde_json::Value;
use time::{macros::format_description, OffsetDateTime};
use time_tz::{timezones, ToTimezone};
use tinytemplate::{error::Error, format, format_unescaped, TinyTemplate};

const NOTIFICATION_TEMPLATE_NAME: &str = "notification";
const ACKNOWLEDGEMENT_TEMPLATE_NAME: &str = "acknowledgement";
const NOTIFICATION_HTML_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/notification.html"
));
const NOTIFICATION_TEXT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/notification.txt"
));
const ACKNOWLEDGEMENT_HTML_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/acknowledgement.html"
));
const ACKNOWLEDGEMENT_TEXT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/acknowledgement.txt"
));

const SUBMISSION_TIMEZONE: &str = "Europe/London";

/// Fixed details of the business the form belongs to.
#[derive(Serialize, Debug)]
pub struct BusinessProfile {
    pub company_name: &'static str,
    pub website_sender_name: &'static str,
    pub tagline: &'static str,
    pub phone: &'static str,
    pub contact_email: &'static str,
    pub whatsapp_url: &'static str,
    pub registration_number: &'static str,
    pub response_time: &'static str,
    pub business_hours: &'static str,
}

pub static MODERN_SERVICES: BusinessProfile = BusinessProfile {
    company_name: "Modern Services",
    website_sender_name: "Modern Services Website",
    tagline: "Your Trusted Property Management Partner",
    phone: "+44 7808 646056",
    contact_email: "info@modernservices.org.uk",
    whatsapp_url: "https://wa.me/447808646056",
    registration_number: "OC407556",
    response_time: "24 hours",
    business_hours: "Monday - Friday, 9:00 AM - 6:00 PM UK time",
};

/// An email ready to be handed to a relay.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: Mailbox,
    pub to: Mailbox,
    pub reply_to: Option<Mailbox>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[derive(Serialize)]
struct NotificationContext<'a> {
    name: &'a str,
    email: String,
    phone: Option<&'a str>,
    message: &'a str,
    submitted_at: String,
}

#[derive(Serialize)]
struct AcknowledgementContext<'a> {
    business: &'a BusinessProfile,
    name: &'a str,
    message: &'a str,
}

pub struct MessageComposer {
    profile: &'static BusinessProfile,
    sender: Address,
    business_inbox: Address,
}

impl MessageComposer {
    pub fn new(sender: Address, business_inbox: Address) -> Self {
        Self {
            profile: &MODERN_SERVICES,
            sender,
            business_inbox,
        }
    }

    pub fn from_settings(settings: &MailSettings) -> Self {
        Self::new(settings.sender.clone(), settings.business_inbox.clone())
    }

    /// Builds the message telling staff about a new submission.
    pub fn notification(
        &self,
        submission: &ValidatedSubmission,
        submitted_at: OffsetDateTime,
    ) -> Result<OutboundMessage, ComposeError> {
        let context = NotificationContext {
            name: submission.name,
            email: submission.email.to_string(),
            phone: submission.phone,
            message: submission.message,
            submitted_at: format_submission_time(submitted_at),
        };
        Ok(OutboundMessage {
            from: Mailbox::new(
                Some(self.profile.website_sender_name.into()),
                self.sender.clone(),
            ),
            to: Mailbox::new(
                Some(self.profile.company_name.into()),
                self.business_inbox.clone(),
            ),
            reply_to: Some(Mailbox::new(
                Some(submission.name.into()),
                submission.email.clone(),
            )),
            subject: format!("An email from client {}", submission.name),
            text_body: render_text(NOTIFICATION_TEMPLATE_NAME, &context)?,
            html_body: render_html(NOTIFICATION_TEMPLATE_NAME, &context)?,
        })
    }

    /// Builds the confirmation sent back to the person who submitted the form.
    pub fn acknowledgement(
        &self,
        submission: &ValidatedSubmission,
    ) -> Result<OutboundMessage, ComposeError> {
        let context = AcknowledgementContext {
            business: self.profile,
            name: submission.name,
            message: submission.message,
        };
        Ok(OutboundMessage {
            from: Mailbox::new(Some(self.profile.company_name.into()), self.sender.clone()),
            to: Mailbox::new(Some(submission.name.into()), submission.email.clone()),
            reply_to: None,
            subject: format!("Thank you for contacting {}", self.profile.company_name),
            text_body: render_text(ACKNOWLEDGEMENT_TEMPLATE_NAME, &context)?,
            html_body: render_html(ACKNOWLEDGEMENT_TEMPLATE_NAME, &context)?,
        })
    }
}

fn render_html(name: &str, context: &impl Serialize) -> Result<String, ComposeError> {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("line_breaks", render_line_breaks);
    tt.add_template(NOTIFICATION_TEMPLATE_NAME, NOTIFICATION_HTML_TEMPLATE)?;
    tt.add_template(ACKNOWLEDGEMENT_TEMPLATE_NAME, ACKNOWLEDGEMENT_HTML_TEMPLATE)?;
    Ok(tt.render(name, context)?)
}

fn render_text(name: &str, context: &impl Serialize) -> Result<String, ComposeError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(NOTIFICATION_TEMPLATE_NAME, NOTIFICATION_TEXT_TEMPLATE)?;
    tt.add_template(ACKNOWLEDGEMENT_TEMPLATE_NAME, ACKNOWLEDGEMENT_TEXT_TEMPLATE)?;
    Ok(tt.render(name, context)?.trim().to_string())
}

/// Escapes the value for HTML, then turns each line break into `<br>`.
fn render_line_breaks(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\r\n", "\n").replace('\n', "<br>"));
    Ok(())
}

/// Renders the time as UK staff read it, e.g. `01/07/2024, 13:00:00`.
pub fn format_submission_time(submitted_at: OffsetDateTime) -> String {
    let local = match timezones::get_by_name(SUBMISSION_TIMEZONE) {
        Some(tz) => submitted_at.to_timezone(tz),
        None => submitted_at,
    };
    local
        .format(format_description!(
            "[day]/[month]/[year], [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| local.to_string())
}

#[derive(Debug)]
pub struct ComposeError(Error);

impl From<Error> for ComposeError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error rendering email template: {}", self.0)
    }
}

impl std::error::Error for ComposeError {}
