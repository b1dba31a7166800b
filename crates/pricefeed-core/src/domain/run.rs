//! 갱신 실행 종류.

use serde::{Deserialize, Serialize};

/// 일괄 갱신이 어떤 경로로 시작되었는지 구분합니다.
///
/// 실행 기록(refresh_runs)과 실패 기록(failed_updates)에 그대로 저장되어
/// 사후 조회 시 스케줄 실행과 수동 실행을 구분하는 데 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// 스케줄러에 의한 주기 실행
    Scheduled,
    /// 관리자에 의한 수동 실행
    Manual,
}

impl RunKind {
    /// DB 저장용 문자열로 변환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown run kind: {}", s)),
        }
    }
}
