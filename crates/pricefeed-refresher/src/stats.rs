//! 갱신 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 일괄 갱신 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshStats {
    /// 대상 종목 수
    pub total: usize,
    /// 갱신 성공 종목 수
    pub updated: usize,
    /// 종료 시점까지 실패로 남은 종목 수
    pub failed: usize,
    /// 신규 데이터 없이 성공한 종목 수
    pub empty: usize,
    /// 쓰로틀링으로 분류된 실패 횟수 (재시도 포함 누적)
    pub throttled: usize,
    /// 저장된 신규 시세 행 수
    pub rows_added: usize,
    /// 수행된 반복 횟수
    pub iterations: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RefreshStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.updated as f64 / self.total as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            updated = self.updated,
            failed = self.failed,
            empty = self.empty,
            throttled = self.throttled,
            rows_added = self.rows_added,
            iterations = self.iterations,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "갱신 완료"
        );
    }
}
