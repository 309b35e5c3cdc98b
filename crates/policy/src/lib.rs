//! Policy engines: search recency enforcement and memory retention.
//!
//! Both are pure decision logic over data tables; no I/O happens here.

pub mod classifier;
pub mod memory;
pub mod recency;

pub use classifier::classify as classify_query;
pub use recency::{enforce, explain, rule_for, validate_override, RecencyRule};
