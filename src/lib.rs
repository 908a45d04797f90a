//! Posts Google Alert feed entries to subreddits, once per url and subreddit.

pub mod bot;
pub mod client;
pub mod config;
pub mod engine;
pub mod feed;
pub mod poster;
pub mod scheduler;
pub mod storage;
pub mod util;
pub mod web;
