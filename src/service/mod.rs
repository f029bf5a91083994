pub mod calculator;
pub mod engine;
pub mod estimate;
pub mod report;
pub mod rule_source;
pub mod session;

pub use calculator::Calculator;
pub use engine::DiscountEngine;
pub use estimate::{convert_estimate_to_invoice, validate_estimate, Conversion};
pub use report::{DiscountAnalysis, ReportService};
pub use rule_source::{PgRuleSource, RuleSource, StaticRuleSource};
pub use session::{EditingSession, FieldChange, Reaction, RemoteRecompute, RuleFetch};
