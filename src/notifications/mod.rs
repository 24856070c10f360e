//! Notification email — customer tracking mail and operator failure notices.
//!
//! Customers get an HTML "your order has shipped" mail with the tracking
//! number and a carrier tracking link, but only when the shipment carries
//! the `enot` option and the receiver has an address. Operators get a plain
//! notice when a file lands in the error directory.
//!
//! Sending is best-effort: a failed mail is logged and never fails the
//! shipment that triggered it.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::parser::CarrierKind;

/// Carrier tracking page for a parcel number, if the carrier has one.
fn tracking_url(carrier: CarrierKind, tracking: &str) -> Option<String> {
    match carrier {
        CarrierKind::Dhl => Some(format!(
            "https://www.dhl.com/se-sv/home/tracking.html?tracking-id={tracking}"
        )),
        CarrierKind::PostNord => None,
    }
}

/// Build the customer-facing HTML body.
fn build_tracking_html(
    from_name: &str,
    order_no: &str,
    tracking_number: &str,
    tracking_url: Option<&str>,
    carrier_name: &str,
    custom_message: &str,
) -> String {
    let message_html = if custom_message.is_empty() {
        String::new()
    } else {
        format!("<p>{custom_message}</p>")
    };
    let button_html = match tracking_url {
        Some(url) => format!(r#"<a href="{url}" class="btn">Spåra din leverans</a>"#),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <style>
    body {{ font-family: Arial, sans-serif; color: #333; max-width: 600px; margin: 0 auto; }}
    .header {{ background: #2c3e50; color: white; padding: 20px; text-align: center; }}
    .content {{ padding: 20px; }}
    .tracking-box {{ background: #f8f9fa; border: 1px solid #dee2e6; border-radius: 8px; padding: 15px; margin: 20px 0; text-align: center; }}
    .tracking-number {{ font-size: 18px; font-weight: bold; color: #2c3e50; }}
    .btn {{ display: inline-block; background: #e74c3c; color: white; text-decoration: none; padding: 12px 24px; border-radius: 5px; margin: 10px 0; }}
    .footer {{ color: #999; font-size: 12px; text-align: center; padding: 20px; }}
  </style>
</head>
<body>
  <div class="header">
    <h1>{from_name}</h1>
  </div>
  <div class="content">
    <h2>Din order {order_no} har skickats!</h2>
    <p>Vi har skickat din order med {carrier_name}.</p>

    <div class="tracking-box">
      <p>Spårningsnummer:</p>
      <p class="tracking-number">{tracking_number}</p>
      {button_html}
    </div>

    {message_html}

    <p>Vänliga hälsningar,<br>{from_name}</p>
  </div>
  <div class="footer">
    <p>Detta mail skickades automatiskt. Svara inte på detta mail.</p>
  </div>
</body>
</html>"#
    )
}

/// Sends notification email via SMTP.
pub struct Mailer {
    config: SmtpConfig,
}

impl Mailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn from_mailbox(&self) -> Result<lettre::message::Mailbox, NotifyError> {
        let raw = if self.config.from_name.is_empty() {
            self.config.from_address.clone()
        } else {
            format!("{} <{}>", self.config.from_name, self.config.from_address)
        };
        raw.parse().map_err(|e| NotifyError::InvalidAddress {
            address: raw,
            reason: format!("{e}"),
        })
    }

    /// Send the message over SMTP (STARTTLS) on a blocking thread.
    async fn send(&self, email: Message) -> Result<(), NotifyError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::starttls_relay(&host)
                .map_err(|e| NotifyError::Smtp(format!("relay setup failed: {e}")))?
                .port(port)
                .credentials(creds)
                .build();
            transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| NotifyError::Smtp(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::Smtp(format!("send task panicked: {e}")))?
    }

    /// Send a tracking email to the customer.
    ///
    /// Returns `Ok(false)` when there is nothing to send (no address or no
    /// tracking number); those cases are skips, not errors.
    pub async fn send_tracking_email(
        &self,
        to_email: &str,
        order_no: &str,
        tracking_number: &str,
        carrier: CarrierKind,
        custom_message: &str,
    ) -> Result<bool, NotifyError> {
        if to_email.is_empty() {
            warn!(order_no, "No customer email, skipping tracking mail");
            return Ok(false);
        }
        if tracking_number.is_empty() {
            warn!(order_no, "No tracking number, skipping tracking mail");
            return Ok(false);
        }

        let url = tracking_url(carrier, tracking_number);
        let html = build_tracking_html(
            &self.config.from_name,
            order_no,
            tracking_number,
            url.as_deref(),
            carrier.display_name(),
            custom_message,
        );

        let email = Message::builder()
            .from(self.from_mailbox()?)
            .to(to_email.parse().map_err(|e| NotifyError::InvalidAddress {
                address: to_email.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(format!("Din order {order_no} har skickats!"))
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.send(email).await?;
        info!(order_no, to = to_email, "Tracking email sent");
        Ok(true)
    }

    /// Notify the operator that a file landed in the error directory.
    ///
    /// Returns `Ok(false)` when no operator address is configured.
    pub async fn send_failure_notice(
        &self,
        file_name: &str,
        reason: &str,
    ) -> Result<bool, NotifyError> {
        if self.config.operator_address.is_empty() {
            return Ok(false);
        }

        let body = format!(
            "Filen {file_name} kunde inte bearbetas och har flyttats till Error.\n\n\
             Fel: {reason}\n\n\
             Kontrollera filen och lägg tillbaka den i Outgoing för ett nytt försök.\n"
        );

        let email = Message::builder()
            .from(self.from_mailbox()?)
            .to(self
                .config
                .operator_address
                .parse()
                .map_err(|e| NotifyError::InvalidAddress {
                    address: self.config.operator_address.clone(),
                    reason: format!("{e}"),
                })?)
            .subject(format!("Fraktfel: {file_name}"))
            .body(body)
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.send(email).await?;
        info!(file_name, "Failure notice sent to operator");
        Ok(true)
    }
}
