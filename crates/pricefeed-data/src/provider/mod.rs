//! 가격 소스 어댑터 계약 및 레지스트리.
//!
//! 모든 소스 어댑터는 `PriceProvider` trait을 구현하며, 소스 코드
//! 문자열(예: "YAHOO")을 키로 하는 `ProviderRegistry`를 통해 선택됩니다.
//! 갱신 엔진은 구체 소스 구현을 전혀 알지 못합니다.
//!
//! # 에러 분류
//!
//! 어댑터는 자유 텍스트 메시지 매칭 대신 구조화된 `SourceError` 종류를
//! 반환합니다. 쓰로틀링 판정(`is_throttling`)과 영구 실패 판정
//! (`is_permanent`)은 이 종류만으로 결정됩니다.

pub mod yahoo;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use pricefeed_core::DailyBar;

/// 소스 어댑터 오류.
#[derive(Debug, Error)]
pub enum SourceError {
    /// 소스 일시 장애 (네트워크, 5xx 등)
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// 요청 한도 초과 (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 소스가 심볼을 인식하지 못함
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// 등록되지 않은 소스 코드
    #[error("Source '{0}' is not supported")]
    NotSupported(String),

    /// 응답 파싱 실패
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SourceError {
    /// 쓰로틀링 신호(동시성 축소 대상)인지 확인합니다.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout(_))
    }

    /// 재시도가 무의미한 영구 실패인지 확인합니다.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::SymbolNotFound(_) | Self::NotSupported(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// 가격 소스 어댑터 계약.
///
/// 심볼과 기간을 받아 거래일 오름차순으로 정규화된 일별 시세를 반환합니다.
/// 빈 결과는 오류가 아니라 "신규 데이터 없음"을 의미합니다.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// 이 어댑터가 담당하는 소스 코드 (예: "YAHOO").
    fn source_code(&self) -> &str;

    /// 일별 시세 조회.
    ///
    /// # 인자
    /// * `source_symbol` - 소스별 심볼 (예: "005930.KS")
    /// * `start` - 조회 시작일 (포함)
    /// * `end` - 조회 종료일 (포함), `None`이면 최신까지
    async fn fetch_daily(
        &self,
        source_symbol: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyBar>, SourceError>;
}

/// 소스 코드 기반 어댑터 레지스트리.
///
/// 종목의 소스 코드로 어댑터를 찾아 조회를 위임합니다. 등록되지 않은
/// 코드는 `SourceError::NotSupported`로 즉시 실패합니다.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn PriceProvider>>,
}

impl ProviderRegistry {
    /// 빈 레지스트리 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 어댑터(Yahoo Finance)가 등록된 레지스트리 생성.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(yahoo::YahooProvider::new()));
        registry
    }

    /// 어댑터 등록. 동일 코드가 이미 있으면 교체합니다.
    pub fn register(&mut self, provider: Arc<dyn PriceProvider>) {
        self.providers
            .insert(provider.source_code().to_uppercase(), provider);
    }

    /// 소스 코드로 어댑터 조회.
    pub fn get(&self, source_code: &str) -> Option<Arc<dyn PriceProvider>> {
        self.providers.get(&source_code.to_uppercase()).cloned()
    }

    /// 등록된 소스 코드 목록.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.providers.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// 소스 코드에 해당하는 어댑터로 일별 시세를 조회합니다.
    pub async fn fetch_daily(
        &self,
        source_code: &str,
        source_symbol: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyBar>, SourceError> {
        let provider = self
            .get(source_code)
            .ok_or_else(|| SourceError::NotSupported(source_code.to_string()))?;
        provider.fetch_daily(source_symbol, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct StubProvider;

    #[async_trait]
    impl PriceProvider for StubProvider {
        fn source_code(&self) -> &str {
            "stub"
        }

        async fn fetch_daily(
            &self,
            _source_symbol: &str,
            start: NaiveDate,
            _end: Option<NaiveDate>,
        ) -> Result<Vec<DailyBar>, SourceError> {
            Ok(vec![DailyBar {
                trade_date: start,
                open: dec!(1),
                high: dec!(2),
                low: dec!(1),
                close: dec!(2),
                adj_close: dec!(2),
                volume: 100,
            }])
        }
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_supported() {
        let registry = ProviderRegistry::new();
        let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let err = registry
            .fetch_daily("FINNHUB", "AAPL", start, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotSupported(code) if code == "FINNHUB"));
    }

    #[tokio::test]
    async fn test_registry_dispatches_case_insensitively() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider));

        let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let bars = registry
            .fetch_daily("Stub", "ANY", start, None)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].trade_date, start);
        assert_eq!(registry.codes(), vec!["STUB".to_string()]);
    }

    #[test]
    fn test_throttling_classification() {
        assert!(SourceError::RateLimited.is_throttling());
        assert!(SourceError::Timeout("30s".into()).is_throttling());
        assert!(!SourceError::Unavailable("503".into()).is_throttling());
        assert!(!SourceError::SymbolNotFound("X".into()).is_throttling());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(SourceError::SymbolNotFound("X".into()).is_permanent());
        assert!(SourceError::NotSupported("FINNHUB".into()).is_permanent());
        assert!(!SourceError::Unavailable("503".into()).is_permanent());
        assert!(!SourceError::RateLimited.is_permanent());
    }
}
