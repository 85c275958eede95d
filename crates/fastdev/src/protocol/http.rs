use fastdev_wire::{FlatMap, Message, Value};

use super::{Protocol, default_label};

/// Headers that legitimately differ between a recording and its replay.
const VOLATILE_HEADERS: &[&str] = &["date"];

/// HTTP/1.x messages in their textual form: start line, headers, blank line,
/// body.
pub struct Http;

impl Protocol for Http {
    fn should_diff(&self) -> bool {
        true
    }

    /// `METHOD /path`, without the query string.
    fn label(&self, request: &Message) -> String {
        let text = request.to_text();
        let parsed = ParsedHttp::parse(&text);
        match parsed.start.as_slice() {
            [method, target, ..] => {
                let path = target.split('?').next().unwrap_or_default();
                format!("{method} {path}")
            }
            _ => default_label(request),
        }
    }

    fn flat_request(&self, request: &Message) -> Option<FlatMap> {
        let text = request.to_text();
        let parsed = ParsedHttp::parse(&text);
        let [method, target, ..] = parsed.start.as_slice() else {
            return None;
        };
        let (path, query) = target.split_once('?').unwrap_or((*target, ""));

        let mut fields = vec![
            ("method".to_string(), Value::scalar(*method)),
            ("path".to_string(), Value::scalar(path)),
        ];
        if !query.is_empty() {
            fields.push(("query".to_string(), query_value(query)));
        }
        parsed.push_headers_and_body(&mut fields);
        Some(Value::Map(fields).flatten())
    }

    fn flat_response(&self, response: &Message) -> Option<FlatMap> {
        let text = response.to_text();
        let parsed = ParsedHttp::parse(&text);
        let [_version, status, ..] = parsed.start.as_slice() else {
            return None;
        };

        let mut fields = vec![("status".to_string(), Value::scalar(*status))];
        parsed.push_headers_and_body(&mut fields);
        Some(Value::Map(fields).flatten())
    }
}

struct ParsedHttp<'a> {
    start: Vec<&'a str>,
    headers: Vec<(&'a str, &'a str)>,
    body: &'a str,
}

impl<'a> ParsedHttp<'a> {
    fn parse(text: &'a str) -> Self {
        let (head, body) = text
            .split_once("\r\n\r\n")
            .or_else(|| text.split_once("\n\n"))
            .unwrap_or((text, ""));
        let mut lines = head.lines();
        let start = lines
            .next()
            .map(|line| line.split_whitespace().collect())
            .unwrap_or_default();
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();
        Self {
            start,
            headers,
            body,
        }
    }

    fn push_headers_and_body(&self, fields: &mut Vec<(String, Value)>) {
        let headers: Vec<(String, Value)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), Value::scalar(*value)))
            .filter(|(name, _)| !VOLATILE_HEADERS.contains(&name.as_str()))
            .collect();
        if !headers.is_empty() {
            fields.push(("headers".to_string(), Value::Map(headers)));
        }
        if !self.body.is_empty() {
            let body = match serde_json::from_str::<serde_json::Value>(self.body) {
                Ok(json) => Value::from_json(&json),
                Err(_) => Value::scalar(self.body),
            };
            fields.push(("body".to_string(), body));
        }
    }
}

fn query_value(query: &str) -> Value {
    Value::Map(
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key.to_string(), Value::scalar(value))
            })
            .collect(),
    )
}
