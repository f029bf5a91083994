use thiserror::Error;

/// 服务层错误
#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 外部规则查询失败，不重试
    #[error("rule lookup failed: {0}")]
    Lookup(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// 编辑会话错误 (宿主传入的字段变更无法应用)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("row {row} out of range ({len} items)")]
    RowOutOfRange { row: usize, len: usize },

    #[error("field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("unknown field: {0}")]
    UnknownField(String),
}

pub type AppResult<T> = Result<T, AppError>;
