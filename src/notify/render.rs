//! Plain-text, HTML, and SMS renderings of a delta.

use crate::diff::Delta;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

/// Landing page linked from every alert.
pub const PORTAL_INDEX_URL: &str = "https://opsportal.spp.org/Studies/Gen";

/// Longest SMS body Twilio accepts.
pub const SMS_MAX_CHARS: usize = 1600;

/// Email subject line.
pub fn subject(delta: &Delta) -> String {
    format!("[SPP Alert] {} New Impact Study Posting(s)", delta.len())
}

/// Numbered plain-text listing of every new study.
pub fn text_summary(delta: &Delta) -> String {
    let mut out = format!(
        "Found {} new SPP Impact Study posting(s):\n\n",
        delta.len()
    );
    for (idx, record) in delta.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", idx + 1, record.title);
        let _ = writeln!(out, "   Category: {}", record.year_type.label);
        let _ = writeln!(out, "   Link: {}", record.url);
        for (name, value) in record.visible_details() {
            let _ = writeln!(out, "   {name}: {value}");
        }
        out.push('\n');
    }
    out.push_str("---\n");
    let _ = write!(out, "SPP OpsPortal: {PORTAL_INDEX_URL}");
    out
}

/// HTML table version of [`text_summary`]. All portal text is escaped.
pub fn html_summary(delta: &Delta) -> String {
    let mut rows = String::new();
    for record in delta {
        let href = encode_double_quoted_attribute(record.url.as_str());
        let mut details = String::new();
        for (name, value) in record.visible_details() {
            let _ = write!(
                details,
                "<br><small><b>{}:</b> {}</small>",
                encode_text(name),
                encode_text(value)
            );
        }
        let _ = write!(
            rows,
            "<tr>\
             <td style=\"padding:8px;border:1px solid #ddd;\"><a href=\"{href}\">{title}</a></td>\
             <td style=\"padding:8px;border:1px solid #ddd;\">{category}</td>\
             <td style=\"padding:8px;border:1px solid #ddd;\">\
             <a href=\"{href}\">View</a>{details}</td>\
             </tr>\n",
            title = encode_text(&record.title),
            category = encode_text(&record.year_type.label),
        );
    }

    format!(
        "<html>\n<body style=\"font-family:Arial,sans-serif;max-width:700px;margin:0 auto;\">\n\
         <h2 style=\"color:#003366;\">New SPP Impact Studies Available</h2>\n\
         <p>{count} new study posting(s) detected on the \
         <a href=\"{portal}\">SPP OpsPortal</a>.</p>\n\
         <table style=\"border-collapse:collapse;width:100%;\">\n\
         <tr style=\"background:#003366;color:white;\">\
         <th style=\"padding:8px;border:1px solid #ddd;\">Study Name</th>\
         <th style=\"padding:8px;border:1px solid #ddd;\">Category</th>\
         <th style=\"padding:8px;border:1px solid #ddd;\">Details</th></tr>\n\
         {rows}</table>\n\
         <p style=\"color:#666;font-size:12px;margin-top:20px;\">\
         This alert was sent by the SPP Impact Study Monitor.</p>\n\
         </body></html>",
        count = delta.len(),
        portal = PORTAL_INDEX_URL,
    )
}

/// Short text message body, capped at [`SMS_MAX_CHARS`] characters.
pub fn sms_body(delta: &Delta) -> String {
    let body = match delta.records() {
        [] => String::new(),
        [only] => format!(
            "SPP Alert: New impact study posted - {}. Category: {}. View: {}",
            only.title, only.year_type.label, only.url
        ),
        records => {
            let names: Vec<&str> = records.iter().take(3).map(|r| r.title.as_str()).collect();
            let extra = if records.len() > 3 {
                format!(" (+{} more)", records.len() - 3)
            } else {
                String::new()
            };
            format!(
                "SPP Alert: {} new impact studies posted: {}{}. View all: {}",
                records.len(),
                names.join(", "),
                extra,
                PORTAL_INDEX_URL
            )
        }
    };
    truncate_chars(body, SMS_MAX_CHARS)
}

fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
