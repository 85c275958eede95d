use fastdev_wire::tokens::decode_command_line;
use fastdev_wire::{FlatMap, Message, Value};

use super::{Protocol, first_word_upper};

/// Redis commands in command-line form (`SET key "\x00..."`).
pub struct Redis;

impl Protocol for Redis {
    /// The command name, upper-cased.
    fn label(&self, request: &Message) -> String {
        first_word_upper(&request.to_text())
    }

    fn flat_request(&self, request: &Message) -> Option<FlatMap> {
        let tokens = decode_command_line(&request.to_text()).ok()?;
        let items = tokens
            .iter()
            .map(|token| Value::scalar(String::from_utf8_lossy(token)))
            .collect();
        Some(Value::Array(items).flatten())
    }

    fn flat_response(&self, response: &Message) -> Option<FlatMap> {
        Some(Value::scalar(response.to_text()).flatten())
    }
}
