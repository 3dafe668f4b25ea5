//! Quote email rendering and outbound delivery.
//!
//! Bodies are rendered with `tera`; delivery goes through one of the supported HTTP providers
//! (Resend, SendGrid, Mailgun) or a log-only dispatcher when `email.provider = "none"`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guardquote_core::config::{EmailConfig, EmailProvider};
use guardquote_core::cpq::catalog::RateCatalog;
use guardquote_core::cpq::pricing::format_usd;
use guardquote_core::domain::quote::{Quote, TaxSource};
use guardquote_core::notify::{EmailDispatcher, EmailError, EmailMessage};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use tera::{Context, Tera};
use tracing::info;

const QUOTE_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 640px;">
  <h2>{{ company }}</h2>
  <p>Hello {{ quote.client.name }},</p>
  <p>Thank you for considering {{ company }} for your {{ service_name }} needs.
     Quote <strong>{{ quote.quote_number }}</strong> is detailed below.</p>
  <table style="width: 100%; border-collapse: collapse;">
    <thead>
      <tr><th align="left">Description</th><th align="right">Amount</th></tr>
    </thead>
    <tbody>
    {% for line in personnel %}
      <tr>
        <td>{{ line.description }} @ {{ line.hourly_rate | money }}/hr</td>
        <td align="right">{{ line.line_total | money }}</td>
      </tr>
    {% endfor %}
    {% for addon in quote.pricing.addon_lines %}
      <tr>
        <td>{{ addon.name }} ({{ addon.unit }})</td>
        <td align="right">{{ addon.price | money }}</td>
      </tr>
    {% endfor %}
    </tbody>
  </table>
  <p>Subtotal: {{ quote.pricing.subtotal | money }}<br>
     {{ tax_label }}: {{ quote.pricing.tax_amount | money }}<br>
     <strong>Total: {{ quote.pricing.total | money }}</strong></p>
  <p>Payment terms: {{ quote.payment_terms }}<br>
     This quote is valid until {{ quote.valid_until }}.</p>
  <p>Reply to this email to accept the quote or ask any questions.</p>
</div>
"#;

const QUOTE_TEXT: &str = r#"{{ company }}

Hello {{ quote.client.name }},

Quote {{ quote.quote_number }} for {{ service_name }}:
{% for line in personnel %}
- {{ line.description }} @ {{ line.hourly_rate | money }}/hr: {{ line.line_total | money }}{% endfor %}{% for addon in quote.pricing.addon_lines %}
- {{ addon.name }} ({{ addon.unit }}): {{ addon.price | money }}{% endfor %}

Subtotal: {{ quote.pricing.subtotal | money }}
{{ tax_label }}: {{ quote.pricing.tax_amount | money }}
Total: {{ quote.pricing.total | money }}

Payment terms: {{ quote.payment_terms }}
Valid until {{ quote.valid_until }}.
"#;

const ADMIN_TEXT: &str = r#"New quote {{ quote.quote_number }} was created.

Client: {{ quote.client.name }} <{{ quote.client.email }}>
Service: {{ service_name }}
Total: {{ quote.pricing.total | money }}
Valid until {{ quote.valid_until }}.
"#;

/// Register the `money` filter: renders a decimal (number or string) as `$1,234.56`.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(raw) => Decimal::from_str(raw)
            .map_err(|error| tera::Error::msg(format!("money filter: `{raw}`: {error}")))?,
        tera::Value::Number(number) => Decimal::from_str(&number.to_string())
            .map_err(|error| tera::Error::msg(format!("money filter: {error}")))?,
        tera::Value::Null => Decimal::ZERO,
        other => return Err(tera::Error::msg(format!("money filter expects a number, got {other}"))),
    };
    Ok(tera::Value::String(format_usd(amount)))
}

#[derive(Serialize)]
struct PersonnelView {
    description: String,
    hourly_rate: Decimal,
    line_total: Decimal,
}

/// Renders quote and admin notification emails.
#[derive(Clone, Debug)]
pub struct QuoteMailer {
    tera: Arc<Tera>,
    company_name: String,
    from_address: String,
}

impl QuoteMailer {
    pub fn new(company_name: &str, from_address: &str) -> Result<Self, EmailError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_templates(vec![
            ("quote.html", QUOTE_HTML),
            ("quote.txt", QUOTE_TEXT),
            ("admin_notification.txt", ADMIN_TEXT),
        ])
        .map_err(|error| EmailError::Template(error.to_string()))?;

        Ok(Self {
            tera: Arc::new(tera),
            company_name: company_name.to_string(),
            from_address: from_address.to_string(),
        })
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        Self::new(&config.company_name, &config.from_address)
    }

    pub fn quote_email(&self, quote: &Quote, catalog: &RateCatalog) -> Result<EmailMessage, EmailError> {
        let to = quote.client.email.trim();
        if to.is_empty() {
            return Err(EmailError::Rejected(format!(
                "quote {} has no client email address",
                quote.quote_number
            )));
        }

        let context = self.context(quote, catalog);
        Ok(EmailMessage {
            to: to.to_string(),
            subject: format!("Quote {} from {}", quote.quote_number, self.company_name),
            html_body: self.render("quote.html", &context)?,
            text_body: self.render("quote.txt", &context)?,
            reply_to: Some(self.from_address.clone()),
        })
    }

    pub fn admin_notification(
        &self,
        quote: &Quote,
        catalog: &RateCatalog,
        admin_email: &str,
    ) -> Result<EmailMessage, EmailError> {
        let context = self.context(quote, catalog);
        let text_body = self.render("admin_notification.txt", &context)?;

        Ok(EmailMessage {
            to: admin_email.to_string(),
            subject: format!("New quote {} for {}", quote.quote_number, quote.client.name),
            html_body: format!("<pre>{}</pre>", tera::escape_html(&text_body)),
            text_body,
            reply_to: None,
        })
    }

    fn context(&self, quote: &Quote, catalog: &RateCatalog) -> Context {
        let personnel = quote
            .pricing
            .personnel_lines
            .iter()
            .map(|line| PersonnelView {
                description: line.description(),
                hourly_rate: line.hourly_rate,
                line_total: line.line_total,
            })
            .collect::<Vec<_>>();

        let mut context = Context::new();
        context.insert("company", &self.company_name);
        context.insert("quote", quote);
        context.insert("personnel", &personnel);
        context.insert("service_name", catalog.service_name(&quote.service_id));
        context.insert("tax_label", &tax_label(quote));
        context
    }

    fn render(&self, template: &str, context: &Context) -> Result<String, EmailError> {
        self.tera
            .render(template, context)
            .map_err(|error| EmailError::Template(format!("{template}: {error}")))
    }
}

fn tax_label(quote: &Quote) -> String {
    let percent = (quote.pricing.tax_rate * Decimal::ONE_HUNDRED).normalize();
    match quote.pricing.tax_source {
        TaxSource::Override => format!("Tax ({percent}%, custom rate)"),
        TaxSource::State => format!("Tax ({} {percent}%)", quote.client.state),
        TaxSource::Default => format!("Tax ({percent}%)"),
    }
}

/// Builds the dispatcher selected by `email.provider`.
pub fn dispatcher_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailDispatcher>, EmailError> {
    match config.provider {
        EmailProvider::None => Ok(Arc::new(LogOnlyEmailDispatcher)),
        _ => Ok(Arc::new(HttpEmailDispatcher::from_config(config)?)),
    }
}

/// Logs the message instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogOnlyEmailDispatcher {
    fn provider(&self) -> &'static str {
        "none"
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        info!(
            event_name = "email.suppressed",
            to = %message.to,
            subject = %message.subject,
            "email provider is `none`; message logged instead of sent"
        );
        Ok(())
    }
}

pub struct HttpEmailDispatcher {
    client: Client,
    provider: EmailProvider,
    api_key: SecretString,
    from_address: String,
    domain: Option<String>,
    base_url: String,
}

impl HttpEmailDispatcher {
    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            EmailError::Rejected(format!(
                "email.api_key is required for provider `{}`",
                config.provider.as_str()
            ))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| EmailError::Transport(error.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string());

        Ok(Self {
            client,
            provider: config.provider,
            api_key,
            from_address: config.from_address.clone(),
            domain: config.domain.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, message: &EmailMessage) -> Result<reqwest::RequestBuilder, EmailError> {
        let key = self.api_key.expose_secret();
        let request = match self.provider {
            EmailProvider::Resend => self
                .client
                .post(format!("{}/emails", self.base_url))
                .bearer_auth(key)
                .json(&json!({
                    "from": self.from_address,
                    "to": [message.to],
                    "subject": message.subject,
                    "html": message.html_body,
                    "text": message.text_body,
                    "reply_to": message.reply_to,
                })),
            EmailProvider::Sendgrid => {
                let mut body = json!({
                    "personalizations": [{ "to": [{ "email": message.to }] }],
                    "from": { "email": self.from_address },
                    "subject": message.subject,
                    "content": [
                        { "type": "text/plain", "value": message.text_body },
                        { "type": "text/html", "value": message.html_body },
                    ],
                });
                if let Some(reply_to) = &message.reply_to {
                    body["reply_to"] = json!({ "email": reply_to });
                }
                self.client
                    .post(format!("{}/v3/mail/send", self.base_url))
                    .bearer_auth(key)
                    .json(&body)
            }
            EmailProvider::Mailgun => {
                let domain = self.domain.as_deref().ok_or_else(|| {
                    EmailError::Rejected("email.domain is required for mailgun".to_string())
                })?;
                let mut form = vec![
                    ("from", self.from_address.as_str()),
                    ("to", message.to.as_str()),
                    ("subject", message.subject.as_str()),
                    ("text", message.text_body.as_str()),
                    ("html", message.html_body.as_str()),
                ];
                if let Some(reply_to) = &message.reply_to {
                    form.push(("h:Reply-To", reply_to.as_str()));
                }
                self.client
                    .post(format!("{}/v3/{domain}/messages", self.base_url))
                    .basic_auth("api", Some(key))
                    .form(&form)
            }
            EmailProvider::None => {
                return Err(EmailError::Rejected("no email provider is configured".to_string()))
            }
        };
        Ok(request)
    }
}

#[async_trait]
impl EmailDispatcher for HttpEmailDispatcher {
    fn provider(&self) -> &'static str {
        self.provider.as_str()
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let response = self
            .request(message)?
            .send()
            .await
            .map_err(|error| EmailError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        let reason = format!("{} returned {status}: {}", self.provider.as_str(), detail.trim());
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(EmailError::Rejected(reason))
        } else {
            Err(EmailError::Transport(reason))
        }
    }
}

fn default_base_url(provider: EmailProvider) -> &'static str {
    match provider {
        EmailProvider::Resend => "https://api.resend.com",
        EmailProvider::Sendgrid => "https://api.sendgrid.com",
        EmailProvider::Mailgun => "https://api.mailgun.net",
        EmailProvider::None => "",
    }
}
