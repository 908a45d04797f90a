//! Small helpers shared by the feed reader, the poster and the config loader.
//!
//! - **Text**: markup stripping and title cleanup for alert entries
//! - **URL validation**: feed URL policy and link sanity checks

mod text;
mod url_validator;

pub use text::{clean_title, strip_html, MAX_TITLE_CHARS};
pub use url_validator::{is_postable_url, validate_feed_url, UrlValidationError};
