//! Remote rule list fetching.

pub mod fetcher;

pub use fetcher::{parse_rules, FetchError, RuleListFetcher, DEFAULT_RULES_URL};
