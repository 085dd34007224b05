// Remote stream access
// Byte-range transport and the window fetcher that fills the frame store

pub mod client;
pub mod fetch;

pub use client::{HttpRangeSource, RangeSource};
pub use fetch::RangeFetcher;
