//! 操作员输入解析：斜杠命令与按钮回调
//!
//! 在协议入口一次性解码为封闭枚举，处理逻辑里不再做字符串匹配。

use std::fmt;
use std::str::FromStr;

use crate::order::OrderNumber;

/// 按钮回调动作，payload 形如 `confirm:EM-1A2B3C4D`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    Confirm,
    Cancel,
    Archive,
    View,
    ReplyInit,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::Confirm => "confirm",
            CallbackAction::Cancel => "cancel",
            CallbackAction::Archive => "archive",
            CallbackAction::View => "view",
            CallbackAction::ReplyInit => "reply_init",
        }
    }

    /// 生成按钮 payload
    pub fn payload(&self, number: &OrderNumber) -> String {
        format!("{}:{}", self.as_str(), number)
    }
}

impl FromStr for CallbackAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(CallbackAction::Confirm),
            "cancel" => Ok(CallbackAction::Cancel),
            "archive" => Ok(CallbackAction::Archive),
            "view" => Ok(CallbackAction::View),
            "reply_init" => Ok(CallbackAction::ReplyInit),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub action: CallbackAction,
    pub order_number: OrderNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParseError {
    /// 没有 `:` 或订单号为空 / 格式不对
    MissingOrderNumber,
    UnknownAction(String),
}

pub fn parse_callback(data: &str) -> Result<Callback, CallbackParseError> {
    let (action, number) = data
        .split_once(':')
        .ok_or(CallbackParseError::MissingOrderNumber)?;
    let order_number =
        OrderNumber::parse(number).map_err(|_| CallbackParseError::MissingOrderNumber)?;
    let action = action
        .trim()
        .parse::<CallbackAction>()
        .map_err(|_| CallbackParseError::UnknownAction(action.trim().to_string()))?;
    Ok(Callback {
        action,
        order_number,
    })
}

/// 命令动词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Help,
    View,
    Confirm,
    Cancel,
    Archive,
    Unarchive,
    DeleteArchived,
    Reply,
    SendMessage,
    CancelReply,
    ListPending,
    ListUnread,
    ListRecent,
    Search,
}

/// 动词表：(命令字, 动词)
const VERBS: &[(&str, Verb)] = &[
    ("baslat", Verb::Help),
    ("yardim", Verb::Help),
    ("goruntule", Verb::View),
    ("onayla", Verb::Confirm),
    ("iptal", Verb::Cancel),
    ("arsivle", Verb::Archive),
    ("arsivdenkaldir", Verb::Unarchive),
    ("arsivlisil", Verb::DeleteArchived),
    ("yanitla", Verb::Reply),
    ("mesajgonder", Verb::SendMessage),
    ("yanitiptal", Verb::CancelReply),
    ("bekleyenler", Verb::ListPending),
    ("okunmamislar", Verb::ListUnread),
    ("son", Verb::ListRecent),
    ("ara", Verb::Search),
];

impl Verb {
    pub fn lookup(word: &str) -> Option<Verb> {
        let word = word.to_lowercase();
        VERBS.iter().find(|(name, _)| *name == word).map(|(_, v)| *v)
    }

    /// 用法说明（参数格式错误时回显）
    pub fn usage(&self) -> &'static str {
        match self {
            Verb::Help => "/yardim",
            Verb::View => "/goruntule <OrderNo>",
            Verb::Confirm => "/onayla <OrderNo>",
            Verb::Cancel => "/iptal <OrderNo>",
            Verb::Archive => "/arsivle <OrderNo>",
            Verb::Unarchive => "/arsivdenkaldir <OrderNo>",
            Verb::DeleteArchived => "/arsivlisil <OrderNo>",
            Verb::Reply => "/yanitla <OrderNo> <Message>",
            Verb::SendMessage => "/mesajgonder <OrderNo> <Message>",
            Verb::CancelReply => "/yanitiptal",
            Verb::ListPending => "/bekleyenler",
            Verb::ListUnread => "/okunmamislar",
            Verb::ListRecent => "/son <Count>",
            Verb::Search => "/ara <Text>",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.usage())
    }
}

/// 解析后的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    View(OrderNumber),
    Confirm(OrderNumber),
    Cancel(OrderNumber),
    Archive(OrderNumber),
    Unarchive(OrderNumber),
    DeleteArchived(OrderNumber),
    Reply { order_number: OrderNumber, text: String },
    SendMessage { order_number: OrderNumber, text: String },
    CancelReply,
    ListPending,
    ListUnread,
    ListRecent(usize),
    Search(String),
}

/// 文本输入的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    /// 已知动词但参数不合法
    Malformed(Verb),
    /// 以 `/` 开头但不是已知动词
    UnknownCommand,
    /// 普通文本（可能被回复意图捕获）
    Text,
}

fn single_number(rest: &str) -> Option<OrderNumber> {
    let mut parts = rest.split_whitespace();
    let number = OrderNumber::parse(parts.next()?).ok()?;
    parts.next().is_none().then_some(number)
}

fn number_and_text(rest: &str) -> Option<(OrderNumber, String)> {
    let (number, text) = rest.split_once(char::is_whitespace)?;
    let number = OrderNumber::parse(number).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| (number, text.to_string()))
}

/// 解析一条操作员文本
pub fn parse(text: &str) -> Input {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Input::Text;
    };

    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (body, ""),
    };
    // 群聊中 Telegram 会附加 `@BotName`
    let word = head.split('@').next().unwrap_or(head);
    let Some(verb) = Verb::lookup(word) else {
        return Input::UnknownCommand;
    };

    let command = match verb {
        Verb::Help => rest.is_empty().then_some(Command::Help),
        Verb::CancelReply => rest.is_empty().then_some(Command::CancelReply),
        Verb::ListPending => rest.is_empty().then_some(Command::ListPending),
        Verb::ListUnread => rest.is_empty().then_some(Command::ListUnread),
        Verb::View => single_number(rest).map(Command::View),
        Verb::Confirm => single_number(rest).map(Command::Confirm),
        Verb::Cancel => single_number(rest).map(Command::Cancel),
        Verb::Archive => single_number(rest).map(Command::Archive),
        Verb::Unarchive => single_number(rest).map(Command::Unarchive),
        Verb::DeleteArchived => single_number(rest).map(Command::DeleteArchived),
        Verb::Reply => number_and_text(rest)
            .map(|(order_number, text)| Command::Reply { order_number, text }),
        Verb::SendMessage => number_and_text(rest)
            .map(|(order_number, text)| Command::SendMessage { order_number, text }),
        Verb::ListRecent => rest
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Command::ListRecent),
        Verb::Search => (!rest.is_empty()).then(|| Command::Search(rest.to_string())),
    };

    match command {
        Some(command) => Input::Command(command),
        None => Input::Malformed(verb),
    }
}

/// 帮助文本（HTML）
pub fn help_text() -> String {
    let section = |title: &str, verbs: &[Verb]| {
        let lines: Vec<String> = verbs
            .iter()
            .map(|v| format!("<code>{}</code>", crate::render::escape_html(v.usage())))
            .collect();
        format!("<b>{}</b>\n{}", title, lines.join("\n"))
    };
    format!(
        "<b>Operator bot commands</b>\n\n{}\n\n{}\n\n{}",
        section(
            "Orders:",
            &[
                Verb::View,
                Verb::Confirm,
                Verb::Cancel,
                Verb::Archive,
                Verb::Unarchive,
                Verb::DeleteArchived,
            ],
        ),
        section(
            "Messaging:",
            &[Verb::Reply, Verb::SendMessage, Verb::CancelReply],
        ),
        section(
            "Listing &amp; search:",
            &[
                Verb::ListPending,
                Verb::ListUnread,
                Verb::ListRecent,
                Verb::Search,
            ],
        ),
    )
}
