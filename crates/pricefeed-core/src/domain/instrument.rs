//! 종목(Instrument) 도메인 타입.
//!
//! 하나의 종목은 정확히 하나의 가격 소스(price_sources)에 속합니다.
//! 갱신 엔진은 종목을 수정하지 않고 읽기 전용으로만 사용합니다.

use serde::{Deserialize, Serialize};

/// 갱신 대상 종목.
///
/// 저장소 조회 시 소스 테이블과 조인하여 소스 코드까지 채워진 상태로
/// 반환됩니다. 갱신 엔진은 이 타입 하나로 fetch 대상과 소스 어댑터를
/// 결정할 수 있습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// 데이터베이스 ID
    pub id: i64,
    /// 시스템 내부 심볼 (unique)
    pub symbol: String,
    /// 종목명
    pub name: Option<String>,
    /// 소속 가격 소스 ID
    pub source_id: i64,
    /// 가격 소스 코드 (예: "YAHOO")
    pub source_code: String,
    /// 소스별 심볼 (예: "005930.KS")
    pub source_symbol: String,
}

impl Instrument {
    /// 로그 출력용 식별 문자열을 반환합니다.
    pub fn describe(&self) -> String {
        format!("{} ({}:{})", self.symbol, self.source_code, self.source_symbol)
    }
}
