//! 에러 타입 정의.

use std::fmt;

use pricefeed_data::DataError;

/// Refresher 에러 타입
#[derive(Debug)]
pub enum RefresherError {
    /// 저장소 계층 에러
    Data(DataError),
    /// 설정 에러
    Config(String),
    /// 데이터 소스 에러 (Yahoo 등)
    Source(String),
    /// 종목을 찾을 수 없음
    NotFound(String),
}

impl fmt::Display for RefresherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(e) => write!(f, "Data error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Source(msg) => write!(f, "Data source error: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for RefresherError {}

impl From<DataError> for RefresherError {
    fn from(err: DataError) -> Self {
        Self::Data(err)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, RefresherError>;
