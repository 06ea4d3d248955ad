use crate::EmailMessage;

/// A fully rendered email ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub struct EmailTemplate;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl EmailTemplate {
    /// Render a message. `intro` and `news_content` are model-generated HTML
    /// fragments and are inserted as-is; every other field is escaped.
    pub fn render(message: &EmailMessage, app_name: &str) -> RenderedEmail {
        let app = escape(app_name);

        let (subject, body_content) = match message {
            EmailMessage::Welcome { name, intro, .. } => {
                let name = escape(name);
                (
                    format!("Welcome to {} - your stock market toolkit is ready!", app_name),
                    format!(
                        r#"<div style="background:#0f172a;color:#fff;padding:20px 24px;border-radius:8px 8px 0 0;font-size:22px;font-weight:700;">Welcome aboard, {name}</div>
<div style="padding:20px 24px;color:#334155;font-size:15px;line-height:1.6;">
  <p style="margin:0 0 16px;">{intro}</p>
  <p style="margin:0 0 8px;font-weight:600;">Here is what you can do right now:</p>
  <ul style="margin:0 0 16px;padding-left:20px;">
    <li>Build a watchlist and follow the stocks you care about</li>
    <li>See prices, daily moves and key fundamentals at a glance</li>
    <li>Get a daily digest of the news behind your symbols</li>
  </ul>
</div>"#
                    ),
                )
            }
            EmailMessage::NewsDigest {
                date, news_content, ..
            } => {
                let date_html = escape(date);
                (
                    format!("Market News Summary Today - {}", date),
                    format!(
                        r#"<div style="background:#1e293b;color:#fff;padding:20px 24px;border-radius:8px 8px 0 0;">
  <div style="font-size:20px;font-weight:700;">Market News Summary</div>
  <div style="font-size:13px;color:#cbd5e1;margin-top:4px;">{date_html}</div>
</div>
<div style="padding:20px 24px;color:#334155;font-size:15px;line-height:1.6;">
  {news_content}
</div>"#
                    ),
                )
            }
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1"></head>
<body style="margin:0;padding:0;background:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;">
<table width="100%" cellpadding="0" cellspacing="0" style="background:#f1f5f9;padding:32px 0;">
  <tr><td align="center">
    <table width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;overflow:hidden;box-shadow:0 1px 3px rgba(0,0,0,0.1);">
      <tr><td>
        {body_content}
      </td></tr>
    </table>
    <p style="color:#94a3b8;font-size:11px;margin-top:16px;">{app} &middot; You are receiving this because you have an account with us.</p>
  </td></tr>
</table>
</body>
</html>"#
        );

        RenderedEmail {
            to: message.recipient().to_string(),
            subject,
            html,
        }
    }
}
