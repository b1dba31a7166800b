//! 일별 시세(daily_prices) repository.
//!
//! `(instrument_id, trade_date)` 고유 제약과 `ON CONFLICT DO NOTHING`
//! 삽입으로 멱등성을 보장합니다. 같은 구간을 다시 받아와도 기존 행은
//! 건드리지 않고, 신규 행만 추가됩니다.

use chrono::NaiveDate;
use sqlx::postgres::PgPool;
use tracing::debug;

use pricefeed_core::DailyBar;

use crate::error::Result;

const INSERT_BATCH_SIZE: usize = 500;

/// 일별 시세 repository.
pub struct DailyPriceRepository {
    pool: PgPool,
}

impl DailyPriceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 종목의 가장 최근 거래일을 조회합니다.
    ///
    /// 저장된 시세가 없으면 `None`을 반환합니다.
    pub async fn latest_trade_date(&self, instrument_id: i64) -> Result<Option<NaiveDate>> {
        let row: (Option<NaiveDate>,) =
            sqlx::query_as("SELECT MAX(trade_date) FROM daily_prices WHERE instrument_id = $1")
                .bind(instrument_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0)
    }

    /// 시세를 단일 트랜잭션으로 저장하고 신규 삽입된 행 수를 반환합니다.
    ///
    /// 이미 존재하는 `(instrument_id, trade_date)` 행은 건너뜁니다.
    /// 중간에 실패하면 트랜잭션 전체가 롤백되어 부분 기록이 남지 않습니다.
    pub async fn insert_bars(
        &self,
        instrument_id: i64,
        source_id: i64,
        bars: &[DailyBar],
    ) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in bars.chunks(INSERT_BATCH_SIZE) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO daily_prices \
                 (instrument_id, source_id, trade_date, open, high, low, close, adj_close, volume) ",
            );

            query_builder.push_values(chunk, |mut b, bar| {
                b.push_bind(instrument_id)
                    .push_bind(source_id)
                    .push_bind(bar.trade_date)
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(bar.adj_close)
                    .push_bind(bar.volume);
            });

            query_builder.push(" ON CONFLICT (instrument_id, trade_date) DO NOTHING");

            let result = query_builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!(
            instrument_id = instrument_id,
            fetched = bars.len(),
            inserted = inserted,
            "일별 시세 저장 완료"
        );
        Ok(inserted)
    }
}
