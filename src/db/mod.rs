pub mod pool;
pub mod queries;
pub mod report_queries;

pub use pool::create_pool;
pub use queries::*;
pub use report_queries::*;
