//! 종목(instruments) repository.

use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::debug;

use pricefeed_core::Instrument;

use crate::error::Result;

/// 종목 데이터베이스 레코드.
///
/// `price_sources`와 조인하여 소스 코드까지 포함합니다.
#[derive(Debug, Clone, FromRow)]
pub struct InstrumentRecord {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub source_id: i64,
    pub source_symbol: String,
    pub source_code: String,
}

impl InstrumentRecord {
    /// 갱신 엔진이 사용하는 도메인 객체로 변환.
    pub fn to_instrument(&self) -> Instrument {
        Instrument {
            id: self.id,
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            source_id: self.source_id,
            source_code: self.source_code.clone(),
            source_symbol: self.source_symbol.clone(),
        }
    }
}

/// 종목 repository.
///
/// 갱신 엔진은 종목을 읽기만 합니다. 생성/수정/삭제는 외부 관리
/// 도구의 몫입니다.
pub struct InstrumentRepository {
    pool: PgPool,
}

impl InstrumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 활성 소스에 속한 모든 종목을 조회합니다.
    ///
    /// 비활성 소스의 종목은 갱신 대상에서 제외됩니다.
    pub async fn list_active(&self) -> Result<Vec<InstrumentRecord>> {
        let records: Vec<InstrumentRecord> = sqlx::query_as(
            r#"
            SELECT i.id, i.symbol, i.name, i.sector, i.industry, i.country, i.currency,
                   i.source_id, i.source_symbol, s.code AS source_code
            FROM instruments i
            JOIN price_sources s ON s.id = i.source_id
            WHERE s.is_active = true
            ORDER BY i.symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = records.len(), "활성 종목 조회 완료");
        Ok(records)
    }

    /// 심볼로 종목을 조회합니다.
    pub async fn find_by_symbol(&self, symbol: &str) -> Result<Option<InstrumentRecord>> {
        let record: Option<InstrumentRecord> = sqlx::query_as(
            r#"
            SELECT i.id, i.symbol, i.name, i.sector, i.industry, i.country, i.currency,
                   i.source_id, i.source_symbol, s.code AS source_code
            FROM instruments i
            JOIN price_sources s ON s.id = i.source_id
            WHERE i.symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
