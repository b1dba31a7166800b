//! Yahoo Finance 가격 소스 어댑터.
//!
//! Yahoo Finance v8 chart API를 통해 일별 시세(OHLCV)를 조회합니다.
//!
//! # 심볼 형식
//!
//! 모든 심볼은 Yahoo Finance 형식으로 전달되어야 합니다:
//! - 한국 주식: "005930.KS" (코스피) 또는 "124560.KQ" (코스닥)
//! - 미국 주식: "AAPL", "GOOGL"
//! - ETF: "SPY", "QQQ"
//!
//! # 에러 매핑
//!
//! HTTP 상태를 구조화된 `SourceError` 종류로 매핑합니다:
//! - 429 → `RateLimited`
//! - 404 → `SymbolNotFound`
//! - 기타 비정상 상태 → `Unavailable`
//! - 요청 타임아웃 → `Timeout`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use pricefeed_core::DailyBar;

use super::{PriceProvider, SourceError};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Yahoo Finance 소스 어댑터.
pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
}

/// v8 chart API 응답.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
    #[serde(default)]
    adjclose: Option<Vec<AdjCloseBlock>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl YahooProvider {
    /// 기본 엔드포인트로 어댑터 생성.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// 커스텀 엔드포인트로 어댑터 생성 (테스트용).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .expect("HTTP 클라이언트 생성 실패");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// 응답을 거래일 오름차순 `DailyBar` 목록으로 변환.
    ///
    /// open/high/low/close 중 하나라도 비어 있는 인덱스(휴장일 등)는
    /// 건너뜁니다. 수정 종가가 없으면 종가를 사용합니다.
    fn result_to_bars(result: &ChartResult, start: NaiveDate) -> Vec<DailyBar> {
        let Some(quote) = result.indicators.quote.first() else {
            return Vec::new();
        };
        let adjclose = result
            .indicators
            .adjclose
            .as_deref()
            .and_then(|blocks| blocks.first());

        let mut bars: Vec<DailyBar> = Vec::with_capacity(result.timestamp.len());
        for (idx, ts) in result.timestamp.iter().enumerate() {
            let Some(trade_date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive())
            else {
                continue;
            };
            // Yahoo는 타임존에 따라 period1 직전 봉을 끼워주기도 함
            if trade_date < start {
                continue;
            }

            let (Some(open), Some(high), Some(low), Some(close)) = (
                quote.open.get(idx).copied().flatten(),
                quote.high.get(idx).copied().flatten(),
                quote.low.get(idx).copied().flatten(),
                quote.close.get(idx).copied().flatten(),
            ) else {
                continue;
            };

            let adj_close = adjclose
                .and_then(|block| block.adjclose.get(idx).copied().flatten())
                .unwrap_or(close);

            bars.push(DailyBar {
                trade_date,
                open: Decimal::from_f64_retain(open).unwrap_or_default(),
                high: Decimal::from_f64_retain(high).unwrap_or_default(),
                low: Decimal::from_f64_retain(low).unwrap_or_default(),
                close: Decimal::from_f64_retain(close).unwrap_or_default(),
                adj_close: Decimal::from_f64_retain(adj_close).unwrap_or_default(),
                volume: quote.volume.get(idx).copied().flatten().unwrap_or(0),
            });
        }

        bars.sort_by_key(|bar| bar.trade_date);
        bars.dedup_by_key(|bar| bar.trade_date);
        bars
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    fn source_code(&self) -> &str {
        "YAHOO"
    }

    async fn fetch_daily(
        &self,
        source_symbol: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyBar>, SourceError> {
        let period1 = start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        // 종료일 포함 조회를 위해 다음날 자정까지 요청
        let period2 = match end {
            Some(date) => (date + chrono::Duration::days(1))
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp(),
            None => Utc::now().timestamp(),
        };

        let url = format!("{}/v8/finance/chart/{}", self.base_url, source_symbol);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "div,split".to_string()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(SourceError::RateLimited),
            StatusCode::NOT_FOUND => {
                return Err(SourceError::SymbolNotFound(source_symbol.to_string()))
            }
            status if !status.is_success() => {
                return Err(SourceError::Unavailable(format!("HTTP {}", status)))
            }
            _ => {}
        }

        let payload: ChartResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        if let Some(error) = payload.chart.error {
            if error.code.eq_ignore_ascii_case("not found") {
                return Err(SourceError::SymbolNotFound(source_symbol.to_string()));
            }
            return Err(SourceError::Unavailable(
                error.description.unwrap_or(error.code),
            ));
        }

        let bars = payload
            .chart
            .result
            .as_deref()
            .and_then(|results| results.first())
            .map(|result| Self::result_to_bars(result, start))
            .unwrap_or_default();

        debug!(
            symbol = source_symbol,
            start = %start,
            bars = bars.len(),
            "Yahoo 일별 시세 조회 완료"
        );
        Ok(bars)
    }
}
