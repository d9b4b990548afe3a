//! Telegram Bot API 频道
//!
//! 通过 `sendMessage` 向操作员聊天推送（HTML parse mode + inline keyboard），
//! 通过 `answerCallbackQuery` 确认按钮点击。超长消息按 4000 字符切块（不切开标签与实体），按钮挂在最后一块上。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ActionButton, NotificationChannel, NotifyError, OutboundMessage};

const MAX_MESSAGE_CHARS: usize = 4000;

pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Bot API 统一响应外壳
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

fn keyboard(rows: &[Vec<ActionButton>]) -> Option<InlineKeyboardMarkup<'_>> {
    if rows.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup {
        inline_keyboard: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton {
                        text: &b.label,
                        callback_data: &b.payload,
                    })
                    .collect()
            })
            .collect(),
    })
}

/// 切成 HTML 原子单元：标签、实体、单个字符
fn html_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        let len = match ch {
            '<' => rest.find('>').map(|i| i + 1),
            '&' => rest
                .find(';')
                .filter(|&i| i <= 10 && !rest[..i].contains(char::is_whitespace))
                .map(|i| i + 1),
            _ => None,
        }
        .unwrap_or(ch.len_utf8());
        let (token, tail) = rest.split_at(len);
        tokens.push(token);
        rest = tail;
    }
    tokens
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches("</")
        .trim_start_matches('<')
        .trim_end_matches('>')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// 记录未闭合标签：(标签名, 原始开标签)
fn track_tag<'a>(open: &mut Vec<(String, &'a str)>, token: &'a str) {
    if !token.starts_with('<') || !token.ends_with('>') {
        return;
    }
    let name = tag_name(token);
    if token.starts_with("</") {
        if let Some(pos) = open.iter().rposition(|(n, _)| *n == name) {
            open.truncate(pos);
        }
    } else if !token.ends_with("/>") {
        open.push((name, token));
    }
}

/// HTML 切块：尽量在换行处断开，从不切开标签或实体；
/// 跨块的标签在块尾补闭合、在下一块开头重新打开
pub(crate) fn split_html_chunks(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }
    let tokens = html_tokens(text);
    let mut chunks = Vec::new();
    let mut open: Vec<(String, &str)> = Vec::new();
    let mut start = 0;

    while start < tokens.len() {
        let prefix: String = open.iter().map(|(_, tag)| *tag).collect();
        let mut len = prefix.chars().count();
        let mut end = start;
        let mut after_newline = None;
        while end < tokens.len() {
            let token_len = tokens[end].chars().count();
            if len + token_len > max_len && end > start {
                break;
            }
            len += token_len;
            end += 1;
            if tokens[end - 1] == "\n" {
                after_newline = Some(end);
            }
        }
        if end < tokens.len() {
            if let Some(cut) = after_newline {
                end = cut;
            }
        }

        let mut body = String::new();
        for &token in &tokens[start..end] {
            body.push_str(token);
            track_tag(&mut open, token);
        }
        let body = body.trim_end_matches('\n');
        if !body.is_empty() {
            let mut chunk = prefix;
            chunk.push_str(body);
            for (name, _) in open.iter().rev() {
                chunk.push_str(&format!("</{}>", name));
            }
            chunks.push(chunk);
        }
        start = end;
    }
    chunks
}

impl TelegramChannel {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = resp.status();
        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError::Transport(format!("HTTP {}: {}", status, e)))?;
        if !parsed.ok {
            return Err(NotifyError::Rejected(
                parsed.description.unwrap_or_else(|| status.to_string()),
            ));
        }
        Ok(())
    }

    /// 确认按钮点击，可附带一条短提示
    pub async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.call(
            "answerCallbackQuery",
            &AnswerCallbackRequest {
                callback_query_id,
                text,
            },
        )
        .await
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(&self, message: OutboundMessage) -> Result<(), NotifyError> {
        let chunks = split_html_chunks(&message.text, MAX_MESSAGE_CHARS);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let req = SendMessageRequest {
                chat_id: &self.chat_id,
                text: chunk,
                parse_mode: "HTML",
                reply_markup: if i == last {
                    keyboard(&message.actions)
                } else {
                    None
                },
            };
            self.call("sendMessage", &req).await?;
        }
        tracing::debug!("Telegram message sent to chat {} in {} part(s)", self.chat_id, chunks.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Message, Order, OrderId, OrderNumber, OrderStatus};
    use crate::render::order_detail;

    /// 块内标签成对、实体完整
    fn assert_well_formed(chunk: &str) {
        let mut open = Vec::new();
        for token in html_tokens(chunk) {
            if token.starts_with('&') {
                assert!(token.ends_with(';'), "broken entity {:?} in {:?}", token, chunk);
            }
            track_tag(&mut open, token);
        }
        assert!(open.is_empty(), "unclosed tags in {:?}", chunk);
    }

    #[test]
    fn test_split_counts_characters() {
        assert_eq!(split_html_chunks("short", 10), vec!["short".to_string()]);
        let long = "ş".repeat(25);
        let parts = split_html_chunks(&long, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].chars().count(), 5);
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let text = "first line\nsecond line\nthird";
        let parts = split_html_chunks(text, 24);
        assert_eq!(parts, vec!["first line\nsecond line", "third"]);
    }

    #[test]
    fn test_split_keeps_entities_whole() {
        let text = "a".repeat(7) + "&lt;&amp;&gt;";
        for chunk in split_html_chunks(&text, 9) {
            assert_well_formed(&chunk);
        }
    }

    #[test]
    fn test_split_reopens_tags_across_chunks() {
        let text = format!("<b>{}</b>", "a".repeat(25));
        let parts = split_html_chunks(&text, 10);
        assert!(parts.len() > 1);
        for chunk in &parts {
            assert!(chunk.starts_with("<b>") && chunk.ends_with("</b>"), "{:?}", chunk);
            assert_well_formed(chunk);
        }
        let joined: String = parts
            .iter()
            .map(|c| c.trim_start_matches("<b>").trim_end_matches("</b>"))
            .collect();
        assert_eq!(joined, "a".repeat(25));
    }

    #[test]
    fn test_long_order_detail_chunks_are_well_formed() {
        let order = Order {
            id: OrderId::new(),
            order_number: OrderNumber::from_bytes([0xCA, 0xFE, 0x00, 0x01]),
            product_name: "Widget <pro> & co".into(),
            quantity: 1,
            payment_info: "USDT".into(),
            transaction_id: None,
            status: OrderStatus::Pending,
            is_archived: false,
            has_unread_user_message: true,
            messages: (0..60)
                .map(|i| {
                    Message::customer(format!(
                        "question {} about <delivery> & {}",
                        i,
                        "x".repeat(40)
                    ))
                })
                .collect(),
            created_at: chrono::Utc::now(),
        };
        let detail = order_detail(&order);
        assert!(detail.chars().count() > MAX_MESSAGE_CHARS);

        let parts = split_html_chunks(&detail, MAX_MESSAGE_CHARS);
        assert!(parts.len() >= 2);
        for chunk in &parts {
            assert!(chunk.chars().count() <= MAX_MESSAGE_CHARS);
            assert_well_formed(chunk);
        }
        assert!(parts[1].contains("&lt;delivery&gt;"));
    }

    #[test]
    fn test_request_serialization() {
        let rows = vec![vec![ActionButton::new("✅ Confirm", "confirm:EM-00000001")]];
        let req = SendMessageRequest {
            chat_id: "42",
            text: "hi",
            parse_mode: "HTML",
            reply_markup: keyboard(&rows),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(
            json["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "confirm:EM-00000001"
        );

        let bare = SendMessageRequest {
            chat_id: "42",
            text: "hi",
            parse_mode: "HTML",
            reply_markup: keyboard(&[]),
        };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn test_method_url_trims_base() {
        let ch = TelegramChannel::new(
            "https://api.telegram.org/",
            "123:abc",
            "42",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            ch.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
