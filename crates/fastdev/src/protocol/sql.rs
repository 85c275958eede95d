use fastdev_wire::Message;

use super::{Protocol, first_word_upper};

/// SQL statements. Opts out of flattening: statements are matched whole.
pub struct Sql;

impl Protocol for Sql {
    /// The leading keyword, upper-cased (`SELECT`, `INSERT`, ...).
    fn label(&self, request: &Message) -> String {
        first_word_upper(&request.to_text())
    }
}
