//! 일별 시세(OHLCV) 도메인 타입.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 하루치 OHLCV 시세.
///
/// 소스 어댑터가 정규화하여 반환하는 단위이며, 종목당 (instrument, trade_date)
/// 조합으로 최대 한 건만 저장됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBar {
    /// 거래일
    pub trade_date: NaiveDate,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 수정 종가 (분할/배당 반영, 소스가 제공하지 않으면 종가와 동일)
    pub adj_close: Decimal,
    /// 거래량
    pub volume: i64,
}

impl DailyBar {
    /// 하루 변동폭(고가 - 저가)을 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}
