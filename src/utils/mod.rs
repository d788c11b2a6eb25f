//! Utility functions.

pub mod parser;

pub use parser::{format_duration, html_escape, parse_duration};

/// Build an HTML mention link for a user.
pub fn mention(user_id: u64, name: &str) -> String {
    format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        user_id,
        html_escape(name)
    )
}
