//! Render a transcript as plain text, markdown, JSON, or HTML.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::TranscriptMessage;
use crate::persona::PersonaRegistry;

const CODE_BLOCK_REMOVED: &str = "[Code Block Removed]";
const INLINE_CODE_REMOVED: &str = "[Code Removed]";
const FALLBACK_SENDER: &str = "AI Assistant";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n?(.*?)```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Txt,
    #[serde(alias = "md")]
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Html => "html",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Txt => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Json => "application/json",
            Self::Html => "text/html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Txt),
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            other => Err(anyhow::anyhow!(
                "unknown export format '{}' (expected txt, md, json or html)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub include_timestamps: bool,
    pub include_code_blocks: bool,
    pub user_messages_only: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            include_code_blocks: true,
            user_messages_only: false,
        }
    }
}

/// Renders transcripts with persona-attributed sender names
pub struct Exporter<'a> {
    personas: &'a PersonaRegistry,
    current_persona: &'a str,
    options: ExportOptions,
    exported_at: DateTime<Utc>,
}

impl<'a> Exporter<'a> {
    pub fn new(personas: &'a PersonaRegistry, current_persona: &'a str) -> Self {
        Self {
            personas,
            current_persona,
            options: ExportOptions::default(),
            exported_at: Utc::now(),
        }
    }

    pub fn options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn exported_at(mut self, at: DateTime<Utc>) -> Self {
        self.exported_at = at;
        self
    }

    /// `{persona}-chat-{YYYY-MM-DD}.{ext}`
    pub fn filename(&self, format: ExportFormat) -> String {
        filename(self.current_persona, self.exported_at.date_naive(), format)
    }

    pub fn render(&self, messages: &[TranscriptMessage], format: ExportFormat) -> String {
        let selected: Vec<&TranscriptMessage> = messages
            .iter()
            .filter(|m| !self.options.user_messages_only || m.is_user)
            .collect();

        match format {
            ExportFormat::Txt => self.render_txt(&selected),
            ExportFormat::Markdown => self.render_markdown(&selected),
            ExportFormat::Json => self.render_json(&selected),
            ExportFormat::Html => self.render_html(&selected),
        }
    }

    fn sender(&self, message: &TranscriptMessage) -> &str {
        if message.is_user {
            return "You";
        }
        let id = message.persona_id.as_deref().unwrap_or(self.current_persona);
        self.personas
            .get(id)
            .map(|p| p.speaker())
            .unwrap_or(FALLBACK_SENDER)
    }

    fn title(&self) -> String {
        let name = self
            .personas
            .get(self.current_persona)
            .map(|p| p.speaker())
            .unwrap_or(FALLBACK_SENDER);
        format!("Chat with {}", name)
    }

    fn body(&self, content: &str, wrap: &str) -> String {
        if self.options.include_code_blocks {
            return content.to_string();
        }
        strip_code(content, wrap)
    }

    fn render_txt(&self, messages: &[&TranscriptMessage]) -> String {
        messages
            .iter()
            .map(|m| {
                let body = self.body(&m.content, "");
                if self.options.include_timestamps {
                    format!(
                        "[{}] {}: {}",
                        m.timestamp.format(TIMESTAMP_FORMAT),
                        self.sender(m),
                        body
                    )
                } else {
                    format!("{}: {}", self.sender(m), body)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_markdown(&self, messages: &[&TranscriptMessage]) -> String {
        let mut out = format!(
            "# {}\n\n*Exported {}*\n\n---\n\n",
            self.title(),
            self.exported_at.format(TIMESTAMP_FORMAT)
        );
        let sections: Vec<String> = messages
            .iter()
            .map(|m| {
                let mut section = String::new();
                if self.options.include_timestamps {
                    section.push_str(&format!("*{}*\n", m.timestamp.format(TIMESTAMP_FORMAT)));
                }
                section.push_str(&format!("**{}**:\n{}", self.sender(m), self.body(&m.content, "*")));
                section
            })
            .collect();
        out.push_str(&sections.join("\n\n---\n\n"));
        out
    }

    fn render_json(&self, messages: &[&TranscriptMessage]) -> String {
        let entries: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let mut entry = json!({
                    "id": m.id,
                    "sender": if m.is_user { "user" } else { "assistant" },
                    "name": self.sender(m),
                    "content": self.body(&m.content, ""),
                });
                if self.options.include_timestamps {
                    entry["timestamp"] = json!(m.timestamp.to_rfc3339());
                }
                if let Some(provider) = m.provider {
                    entry["provider"] = json!(provider);
                }
                entry
            })
            .collect();

        let document = json!({
            "persona": self.current_persona,
            "exportedAt": self.exported_at.to_rfc3339(),
            "messageCount": entries.len(),
            "messages": entries,
        });
        // Value serialization cannot fail
        serde_json::to_string_pretty(&document).unwrap_or_default()
    }

    fn render_html(&self, messages: &[&TranscriptMessage]) -> String {
        let title = escape_html(&self.title());
        let mut out = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
             <style>\nbody {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}\n\
             .message {{ margin: 1rem 0; padding: 0.75rem; border-radius: 0.5rem; }}\n\
             .user {{ background: #e8f0fe; }}\n.assistant {{ background: #f1f3f4; }}\n\
             .meta {{ color: #666; font-size: 0.85em; }}\n</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );

        for m in messages {
            let class = if m.is_user { "user" } else { "assistant" };
            out.push_str(&format!("<div class=\"message {}\">\n", class));
            out.push_str(&format!(
                "<div class=\"meta\"><strong>{}</strong>",
                escape_html(self.sender(m))
            ));
            if self.options.include_timestamps {
                out.push_str(&format!(" &middot; {}", m.timestamp.format(TIMESTAMP_FORMAT)));
            }
            out.push_str("</div>\n");
            out.push_str(&format!("<div class=\"content\">{}</div>\n", self.html_body(&m.content)));
            out.push_str("</div>\n");
        }

        out.push_str("</body>\n</html>\n");
        out
    }

    fn html_body(&self, content: &str) -> String {
        let escaped = escape_html(&self.body(content, ""));
        if !self.options.include_code_blocks {
            return escaped.replace('\n', "<br>");
        }

        // Backticks survive escaping, so code is found after it
        let mut blocks = Vec::new();
        let with_placeholders = FENCED_CODE.replace_all(&escaped, |caps: &Captures| {
            let lang = &caps[1];
            let class = if lang.is_empty() {
                String::new()
            } else {
                format!(" class=\"language-{}\"", lang)
            };
            blocks.push(format!("<pre><code{}>{}</code></pre>", class, &caps[2]));
            format!("\u{0}{}\u{0}", blocks.len() - 1)
        });
        let inline = INLINE_CODE.replace_all(&with_placeholders, "<code>$1</code>");
        let mut html = inline.replace('\n', "<br>");
        for (i, block) in blocks.iter().enumerate() {
            html = html.replace(&format!("\u{0}{}\u{0}", i), block);
        }
        html
    }
}

/// `{persona}-chat-{YYYY-MM-DD}.{ext}`
pub fn filename(persona_id: &str, date: NaiveDate, format: ExportFormat) -> String {
    format!(
        "{}-chat-{}.{}",
        persona_id,
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

fn strip_code(content: &str, wrap: &str) -> String {
    let fenced = FENCED_CODE.replace_all(content, format!("{wrap}{CODE_BLOCK_REMOVED}{wrap}"));
    INLINE_CODE
        .replace_all(&fenced, format!("{wrap}{INLINE_CODE_REMOVED}{wrap}"))
        .into_owned()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
