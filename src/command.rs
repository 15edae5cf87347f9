use strum_macros::{Display, EnumString};

use crate::message::Message;

/// Commands the proxy answers itself instead of routing them. The set is closed, everything
/// else is a data command forwarded to a shard group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Control {
    /// Opens a transaction.
    Multi,
    /// Commits the open transaction.
    Exec,
    /// Drops the open transaction.
    Discard,
    Ping,
    Quit,
}

#[derive(Debug, PartialEq)]
pub enum Request {
    Control(Control),
    Data(Message),
}

impl From<Message> for Request {
    fn from(message: Message) -> Self {
        match message.command_name().parse::<Control>() {
            Ok(control) => Request::Control(control),
            Err(_) => Request::Data(message),
        }
    }
}
