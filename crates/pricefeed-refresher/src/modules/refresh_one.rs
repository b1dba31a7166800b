//! 단일 종목 갱신 모듈.
//!
//! 한 종목의 갱신 구간을 결정하고, 소스 어댑터로 시세를 받아와
//! 멱등 삽입으로 저장합니다. 실패는 실패 장부에 기록한 뒤 분류된
//! 신호로 orchestrator에 전달됩니다.
//!
//! # 멱등성
//!
//! 같은 종목을 연속 두 번 갱신하면 두 번째는 신규 행 0건으로 끝납니다.
//! 일시 장애 후 재시도해도 중복 행이 생기지 않습니다
//! (`(instrument_id, trade_date)` 고유 제약 + `DO NOTHING` 삽입).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use tracing::{debug, info, warn};

use pricefeed_core::{Instrument, RunKind};
use pricefeed_data::{
    DailyPriceRepository, FailedUpdateRepository, ProviderRegistry, SourceError,
};

/// 실패 분류.
///
/// orchestrator는 이 분류만 보고 쓰로틀링 대응 여부를 결정합니다.
/// 자유 텍스트 메시지는 기록용일 뿐 판정에 쓰이지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 쓰로틀링 (429, 타임아웃) - 동시성 축소 대상
    Throttled,
    /// 일시 장애 (네트워크, 저장소) - 재시도 가치 있음
    Transient,
    /// 영구 실패 (심볼 없음, 미지원 소스) - 재시도 무의미
    Permanent,
}

/// 단일 종목 갱신 실패 신호.
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RefreshFailure {
    /// 소스 어댑터 에러에서 분류를 결정합니다.
    pub fn from_source(err: &SourceError) -> Self {
        let kind = if err.is_throttling() {
            FailureKind::Throttled
        } else if err.is_permanent() {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    /// 저장소 에러 등 일시 장애로 분류되는 실패.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }
}

/// 갱신 구간의 시작일을 계산합니다.
///
/// - 저장된 시세가 있으면 마지막 거래일 + 1일
/// - 없으면 오늘 - `lookback_days` (기본 180일)
/// - 시작일이 오늘보다 뒤면 받아올 것이 없으므로 `None`
pub fn fetch_window(
    latest: Option<NaiveDate>,
    today: NaiveDate,
    lookback_days: i64,
) -> Option<NaiveDate> {
    let start = match latest {
        Some(last) => last + Duration::days(1),
        None => today - Duration::days(lookback_days),
    };

    if start > today {
        None
    } else {
        Some(start)
    }
}

/// 단일 종목 갱신 계약.
///
/// orchestrator는 이 trait을 통해서만 갱신을 수행하므로, 테스트에서는
/// 시나리오를 스크립트한 구현으로 대체할 수 있습니다.
#[async_trait]
pub trait InstrumentRefresher: Send + Sync {
    /// 한 종목을 갱신하고 신규 저장된 행 수를 반환합니다.
    ///
    /// 실패는 실패 장부에 기록된 뒤 분류된 신호로 반환됩니다.
    /// 빈 결과(신규 데이터 없음)는 0행 성공입니다.
    async fn refresh(
        &self,
        instrument: &Instrument,
        run_kind: RunKind,
    ) -> std::result::Result<u64, RefreshFailure>;
}

/// 소스 어댑터와 저장소를 사용하는 실제 갱신 구현.
pub struct SourceRefresher {
    registry: Arc<ProviderRegistry>,
    prices: DailyPriceRepository,
    failures: FailedUpdateRepository,
    lookback_days: i64,
}

impl SourceRefresher {
    pub fn new(pool: PgPool, registry: Arc<ProviderRegistry>, lookback_days: i64) -> Self {
        Self {
            registry,
            prices: DailyPriceRepository::new(pool.clone()),
            failures: FailedUpdateRepository::new(pool),
            lookback_days,
        }
    }

    /// 조회 → 저장까지의 본 작업. 실패 기록은 호출부에서 처리합니다.
    async fn try_refresh(
        &self,
        instrument: &Instrument,
    ) -> std::result::Result<u64, RefreshFailure> {
        let today = Utc::now().date_naive();

        let latest = self
            .prices
            .latest_trade_date(instrument.id)
            .await
            .map_err(|e| RefreshFailure::transient(e.to_string()))?;

        let Some(start) = fetch_window(latest, today, self.lookback_days) else {
            debug!(symbol = %instrument.symbol, "이미 최신 상태 - 조회 생략");
            return Ok(0);
        };

        debug!(
            instrument = %instrument.describe(),
            start = %start,
            "시세 조회 시작"
        );

        let bars = self
            .registry
            .fetch_daily(
                &instrument.source_code,
                &instrument.source_symbol,
                start,
                None,
            )
            .await
            .map_err(|e| RefreshFailure::from_source(&e))?;

        if bars.is_empty() {
            // 신규 데이터 없음은 오류가 아님
            debug!(symbol = %instrument.symbol, "신규 시세 없음");
            return Ok(0);
        }

        let inserted = self
            .prices
            .insert_bars(instrument.id, instrument.source_id, &bars)
            .await
            .map_err(|e| RefreshFailure::transient(e.to_string()))?;

        info!(
            symbol = %instrument.symbol,
            fetched = bars.len(),
            inserted = inserted,
            "종목 갱신 완료"
        );
        Ok(inserted)
    }
}

#[async_trait]
impl InstrumentRefresher for SourceRefresher {
    async fn refresh(
        &self,
        instrument: &Instrument,
        run_kind: RunKind,
    ) -> std::result::Result<u64, RefreshFailure> {
        match self.try_refresh(instrument).await {
            Ok(inserted) => {
                // 성공한 재시도는 기존 미해결 실패 기록을 닫는다
                match self.failures.resolve_for_instrument(instrument.id).await {
                    Ok(resolved) if resolved > 0 => {
                        info!(symbol = %instrument.symbol, resolved = resolved, "기존 실패 기록 해결");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(symbol = %instrument.symbol, error = %e, "실패 기록 해결 처리 실패");
                    }
                }
                Ok(inserted)
            }
            Err(failure) => {
                if let Err(e) = self
                    .failures
                    .record(
                        Some(instrument.id),
                        Some(instrument.source_id),
                        run_kind,
                        &failure.message,
                    )
                    .await
                {
                    warn!(symbol = %instrument.symbol, error = %e, "실패 기록 저장 실패");
                }
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_without_history_uses_lookback() {
        let today = date(2025, 6, 30);
        let start = fetch_window(None, today, 180).unwrap();
        assert_eq!(start, today - Duration::days(180));
    }

    #[test]
    fn test_window_with_history_starts_after_latest() {
        let today = date(2025, 6, 30);
        let start = fetch_window(Some(date(2025, 6, 20)), today, 180).unwrap();
        assert_eq!(start, date(2025, 6, 21));
    }

    #[test]
    fn test_window_up_to_date_returns_none() {
        let today = date(2025, 6, 30);
        assert!(fetch_window(Some(today), today, 180).is_none());
    }

    #[test]
    fn test_window_latest_yesterday_starts_today() {
        let today = date(2025, 6, 30);
        let start = fetch_window(Some(date(2025, 6, 29)), today, 180).unwrap();
        assert_eq!(start, today);
    }

    #[test]
    fn test_failure_classification_from_source() {
        let throttled = RefreshFailure::from_source(&SourceError::RateLimited);
        assert_eq!(throttled.kind, FailureKind::Throttled);

        let timeout = RefreshFailure::from_source(&SourceError::Timeout("30s".into()));
        assert_eq!(timeout.kind, FailureKind::Throttled);

        let permanent = RefreshFailure::from_source(&SourceError::SymbolNotFound("X".into()));
        assert_eq!(permanent.kind, FailureKind::Permanent);

        let unsupported = RefreshFailure::from_source(&SourceError::NotSupported("FINNHUB".into()));
        assert_eq!(unsupported.kind, FailureKind::Permanent);

        let transient = RefreshFailure::from_source(&SourceError::Unavailable("503".into()));
        assert_eq!(transient.kind, FailureKind::Transient);
    }
}
