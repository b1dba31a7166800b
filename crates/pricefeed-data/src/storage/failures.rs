//! 실패 장부(failed_updates) repository.
//!
//! 종목별 갱신 실패를 추가 전용으로 기록하고 해결 여부를 추적합니다.
//! 종목/소스가 삭제되어도 기록은 남습니다 (FK는 SET NULL).

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::debug;

use pricefeed_core::RunKind;

use crate::error::Result;

/// 저장되는 에러 메시지 최대 길이.
const ERROR_MESSAGE_MAX_LEN: usize = 1000;

/// 실패 기록 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct FailedUpdateRecord {
    pub id: i64,
    pub instrument_id: Option<i64>,
    pub source_id: Option<i64>,
    pub run_timestamp: DateTime<Utc>,
    pub run_kind: String,
    pub error_message: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// 실패 장부 repository.
pub struct FailedUpdateRepository {
    pool: PgPool,
}

impl FailedUpdateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 실패를 기록하고 생성된 ID를 반환합니다.
    ///
    /// 존재하지 않는 심볼에 대한 수동 갱신 실패처럼 종목을 특정할 수
    /// 없는 경우 `instrument_id`/`source_id`는 `None`으로 기록됩니다.
    pub async fn record(
        &self,
        instrument_id: Option<i64>,
        source_id: Option<i64>,
        run_kind: RunKind,
        error_message: &str,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO failed_updates (instrument_id, source_id, run_kind, error_message)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(instrument_id)
        .bind(source_id)
        .bind(run_kind.as_str())
        .bind(truncate_message(error_message))
        .fetch_one(&self.pool)
        .await?;

        debug!(id = id, instrument_id = ?instrument_id, "실패 기록 저장");
        Ok(id)
    }

    /// 최근 실패 기록을 조회합니다 (최신순).
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<FailedUpdateRecord>> {
        let records: Vec<FailedUpdateRecord> = sqlx::query_as(
            r#"
            SELECT id, instrument_id, source_id, run_timestamp, run_kind,
                   error_message, resolved, resolved_at
            FROM failed_updates
            ORDER BY run_timestamp DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// 미해결 실패 건수를 반환합니다.
    pub async fn unresolved_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_updates WHERE resolved = false")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// 실패 기록 하나를 해결됨으로 표시합니다.
    ///
    /// 해당 ID가 없으면 `false`를 반환합니다.
    pub async fn mark_resolved(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE failed_updates
            SET resolved = true, resolved_at = NOW()
            WHERE id = $1 AND resolved = false
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 종목의 미해결 실패를 모두 해결됨으로 표시합니다.
    ///
    /// 재시도가 성공했을 때 호출되어 기존 실패 기록을 닫습니다.
    pub async fn resolve_for_instrument(&self, instrument_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE failed_updates
            SET resolved = true, resolved_at = NOW()
            WHERE instrument_id = $1 AND resolved = false
            "#,
        )
        .bind(instrument_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// 에러 메시지를 저장 한도에 맞게 자릅니다 (UTF-8 경계 보존).
fn truncate_message(message: &str) -> &str {
    if message.len() <= ERROR_MESSAGE_MAX_LEN {
        return message;
    }
    let mut end = ERROR_MESSAGE_MAX_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_message_unchanged() {
        assert_eq!(truncate_message("connection refused"), "connection refused");
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "x".repeat(2000);
        assert_eq!(truncate_message(&long).len(), ERROR_MESSAGE_MAX_LEN);
    }

    #[test]
    fn test_truncate_preserves_utf8_boundary() {
        // 3바이트 문자로 경계가 어긋나는 경우
        let long = "가".repeat(500);
        let truncated = truncate_message(&long);
        assert!(truncated.len() <= ERROR_MESSAGE_MAX_LEN);
        assert!(truncated.chars().all(|c| c == '가'));
    }
}
