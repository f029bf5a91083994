pub mod document;
pub mod report;
pub mod rule;

pub use document::{DiscountType, DocStatus, DocumentKind, DocumentState, LineItem, PurchaseDocument};
pub use report::{DiscountAnalysisRow, ReportFilters, ReportSummary};
pub use rule::{
    DiscountAgreement, DiscountContext, DiscountRule, RuleSet, SeasonalPromotion,
    TurnoverIncentive,
};
