//! 갱신 실행 기록(refresh_runs) repository.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::debug;

use pricefeed_core::RunKind;

use crate::error::Result;

/// 갱신 실행 기록 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshRunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_instruments: i32,
    pub updated_instruments: i32,
    pub run_kind: String,
}

/// 갱신 실행 기록 repository.
///
/// 일괄 갱신 한 번당 정확히 한 행이 완료 시점에 기록됩니다.
pub struct RefreshRunRepository {
    pool: PgPool,
}

impl RefreshRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 완료된 실행을 기록하고 생성된 ID를 반환합니다.
    pub async fn record_run(
        &self,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        total_instruments: i32,
        updated_instruments: i32,
        run_kind: RunKind,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO refresh_runs
                (started_at, finished_at, total_instruments, updated_instruments, run_kind)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(started_at)
        .bind(finished_at)
        .bind(total_instruments)
        .bind(updated_instruments)
        .bind(run_kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        debug!(
            id = id,
            total = total_instruments,
            updated = updated_instruments,
            kind = %run_kind,
            "실행 기록 저장"
        );
        Ok(id)
    }

    /// 최근 실행 기록을 조회합니다 (최신순).
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<RefreshRunRecord>> {
        let records: Vec<RefreshRunRecord> = sqlx::query_as(
            r#"
            SELECT id, started_at, finished_at, total_instruments, updated_instruments, run_kind
            FROM refresh_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
