//! 操作员聊天协议：命令 / 回调解析、回复意图槽、分发

pub mod command;
pub mod intent;
pub mod protocol;

pub use command::{parse_callback, Callback, CallbackAction, Command, Input, Verb};
pub use intent::ReplyIntents;
pub use protocol::{CallbackOutcome, OperatorProtocol};
