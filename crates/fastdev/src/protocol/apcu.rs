use fastdev_wire::{FlatMap, Message, Value};

use super::Protocol;

/// Memo cache hits: the cache key as request, the JSON value as response.
pub struct Apcu;

impl Protocol for Apcu {
    fn flat_response(&self, response: &Message) -> Option<FlatMap> {
        let value = match response {
            Message::Json(json) => Value::from_json(json),
            other => match serde_json::from_str::<serde_json::Value>(&other.to_text()) {
                Ok(json) => Value::from_json(&json),
                Err(_) => Value::scalar(other.to_text()),
            },
        };
        Some(value.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_text_responses_flatten_structurally() {
        let flat = Apcu
            .flat_response(&Message::text(r#"{"name":"ada"}"#))
            .unwrap();
        assert_eq!(flat["$.name"], "ada");
    }

    #[test]
    fn key_label_is_the_default() {
        assert_eq!(Apcu.label(&Message::text("user:42")), "user");
    }
}
