//! Per-recipient personalization and the branded HTML wrapper around it.
//!
//! `personalize` is the token pass (`{email}`, salutation, `{qr}`, newlines);
//! `render` wraps its output in the tenant layout. Both are pure: the same
//! template, recipient and context always produce the same bytes.

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{MailError, MailResult};
use crate::mail::calendar::google_calendar_link;
use crate::mail::model::{MailJob, Recipient};
use crate::mail::qr::QrCodeService;

pub const EMAIL_TOKEN: &str = "{email}";
pub const QR_TOKEN: &str = "{qr}";
pub const HONORIFIC: &str = "様";

/// Generic salutations that get swapped for the recipient's name.
/// Checked in order; the first one present wins.
pub const SALUTATION_MARKERS: &[&str] = &[
    "参加者の皆様",
    "参加者各位",
    "お客様各位",
    "all participants",
    "all customers",
];

/// Venue values that mean "no physical place", so no event card.
const NO_VENUE: &[&str] = &["online", "オンライン", "―", "-"];

const LAYOUT_TEMPLATE: &str = "mail_layout";

/// How author-written template text is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMarkup {
    /// Author text is inserted as-is; tenant admins may write HTML.
    #[default]
    Trusted,
    /// Author text and recipient fields are HTML-escaped before substitution.
    Escaped,
}

impl BodyMarkup {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trusted" | "raw" => Some(Self::Trusted),
            "escaped" | "escape" => Some(Self::Escaped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderVariant {
    /// Newlines kept, shown through `white-space: pre-wrap`.
    Standard,
    /// Every newline becomes `<br>`.
    Broadcast,
}

/// Branding and event fields shared by every recipient of a job.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext<'a> {
    pub tenant_name: &'a str,
    pub tenant_logo_url: Option<&'a str>,
    pub sender_name: &'a str,
    pub event_title: Option<&'a str>,
    pub event_date: Option<&'a str>,
    pub venue_name: Option<&'a str>,
}

impl<'a> RenderContext<'a> {
    pub fn from_job(job: &'a MailJob) -> Self {
        Self {
            tenant_name: &job.tenant_name,
            tenant_logo_url: job.tenant_logo_url.as_deref(),
            sender_name: &job.sender_name,
            event_title: job.event_title.as_deref(),
            event_date: job.event_date.as_deref(),
            venue_name: job.venue_name.as_deref(),
        }
    }

    fn has_physical_venue(&self) -> bool {
        match self.venue_name.map(str::trim) {
            None | Some("") => false,
            Some(v) => !NO_VENUE.iter().any(|n| v.eq_ignore_ascii_case(n)),
        }
    }
}

pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    qr: QrCodeService,
    markup: BodyMarkup,
}

impl TemplateRenderer {
    pub fn new(qr: QrCodeService, markup: BodyMarkup) -> MailResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(LAYOUT_TEMPLATE, LAYOUT_HTML)
            .map_err(|e| MailError::Template(format!("failed to register layout: {e}")))?;

        Ok(Self {
            handlebars,
            qr,
            markup,
        })
    }

    /// Token substitution for one recipient. Returns the body fragment only.
    pub fn personalize(
        &self,
        template: &str,
        recipient: &Recipient,
        variant: RenderVariant,
    ) -> String {
        let (mut body, name, email) = match self.markup {
            BodyMarkup::Trusted => (
                template.to_string(),
                recipient.name.clone(),
                recipient.email.clone(),
            ),
            BodyMarkup::Escaped => (
                handlebars::html_escape(template),
                handlebars::html_escape(&recipient.name),
                handlebars::html_escape(&recipient.email),
            ),
        };

        body = body.replace(EMAIL_TOKEN, &email);

        let salutation = format!("{name} {HONORIFIC}");
        match SALUTATION_MARKERS.iter().find(|m| body.contains(**m)) {
            Some(marker) => body = body.replace(*marker, &salutation),
            None => body = format!("{salutation}\n\n{body}"),
        }

        if body.contains(QR_TOKEN) {
            let block = match recipient.id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => self.qr_block(id),
                _ => String::new(),
            };
            body = body.replace(QR_TOKEN, &block);
        }

        match variant {
            RenderVariant::Standard => body,
            RenderVariant::Broadcast => body.replace("\r\n", "\n").replace('\n', "<br>"),
        }
    }

    /// Full HTML document for one recipient.
    pub fn render(
        &self,
        template: &str,
        recipient: &Recipient,
        ctx: &RenderContext<'_>,
        variant: RenderVariant,
    ) -> MailResult<String> {
        let body = self.personalize(template, recipient, variant);

        let event = if ctx.has_physical_venue() {
            let title = ctx.event_title.unwrap_or_default();
            let date = ctx.event_date.unwrap_or_default();
            let venue = ctx.venue_name.unwrap_or_default();
            let calendar_link = if title.is_empty() {
                None
            } else {
                google_calendar_link(title, date, venue)
            };
            Some(json!({
                "title": title,
                "date": date,
                "venue": venue,
                "calendar_link": calendar_link,
            }))
        } else {
            None
        };

        debug!(
            recipient = %recipient.email,
            has_event_card = event.is_some(),
            ?variant,
            "rendering mail body"
        );

        let html = self.handlebars.render(
            LAYOUT_TEMPLATE,
            &json!({
                "tenant_name": ctx.tenant_name,
                "logo_url": ctx.tenant_logo_url,
                "sender_name": ctx.sender_name,
                "pre_wrap": variant == RenderVariant::Standard,
                "body": body,
                "event": event,
            }),
        )?;
        Ok(html)
    }

    fn qr_block(&self, id: &str) -> String {
        let url = attr_escape(&self.qr.image_url(id));
        let size = self.qr.size();
        let id = handlebars::html_escape(id);
        format!(
            concat!(
                "<div style=\"border:2px solid #1f2933;border-radius:8px;padding:16px;",
                "margin:16px 0;text-align:center;\">",
                "<p style=\"margin:0 0 8px;font-weight:bold;\">受付用QRコード / Check-in QR</p>",
                "<img src=\"{url}\" alt=\"QR code\" width=\"{size}\" height=\"{size}\" ",
                "style=\"display:block;margin:0 auto;\" />",
                "<p style=\"margin:8px 0 0;font-family:monospace;font-size:13px;\">{id}</p>",
                "</div>"
            ),
            url = url,
            size = size,
            id = id
        )
    }
}

fn attr_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

const LAYOUT_HTML: &str = r#"<!DOCTYPE html>
<html lang="ja">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1" />
</head>
<body style="margin:0;padding:0;background:#f4f5f7;font-family:'Hiragino Sans','Helvetica Neue',Arial,sans-serif;color:#1f2933;">
<table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background:#f4f5f7;padding:24px 0;">
<tr><td align="center">
<table role="presentation" width="600" cellpadding="0" cellspacing="0" style="max-width:600px;background:#ffffff;border-radius:8px;">
<tr><td style="background:#1f2933;padding:20px 24px;text-align:center;">
{{#if logo_url}}<img src="{{logo_url}}" alt="{{tenant_name}}" style="max-height:48px;" />{{else}}<span style="color:#ffffff;font-size:20px;font-weight:bold;">{{tenant_name}}</span>{{/if}}
</td></tr>
<tr><td style="padding:24px;font-size:15px;line-height:1.7;">
{{#if pre_wrap}}<div style="white-space:pre-wrap;">{{{body}}}</div>{{else}}<div>{{{body}}}</div>{{/if}}
</td></tr>
{{#if event}}
<tr><td style="padding:0 24px 24px;">
<div style="border:1px solid #d9dee3;border-radius:8px;padding:16px;background:#fafbfc;">
<p style="margin:0 0 8px;font-weight:bold;font-size:16px;">{{event.title}}</p>
<p style="margin:0 0 4px;">日時: {{event.date}}</p>
<p style="margin:0;">会場: {{event.venue}}</p>
{{#if event.calendar_link}}<p style="margin:12px 0 0;"><a href="{{event.calendar_link}}" style="color:#2563eb;">カレンダーに追加 / Add to calendar</a></p>{{/if}}
</div>
</td></tr>
{{/if}}
<tr><td style="padding:16px 24px;background:#f9fafb;font-size:12px;color:#6b7280;text-align:center;">
{{#if sender_name}}{{sender_name}}<br />{{/if}}このメールは {{tenant_name}} から送信されています。
</td></tr>
</table>
</td></tr>
</table>
</body>
</html>
"#;
