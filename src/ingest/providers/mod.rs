pub mod json_feed;
pub mod rss;

pub use json_feed::{JsonFeedSource, PopularityField};
pub use rss::RssSource;
