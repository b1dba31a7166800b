//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use crate::error::RefresherError;
use crate::Result;

/// Refresher 전체 설정
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// 일괄 갱신 설정
    pub refresh: RefreshConfig,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 일괄 갱신 설정.
///
/// 쓰로틀링 대응 상수(임계 비율, 축소 폭, 대기 시간)는 전부 설정값이며
/// 코드에 고정되어 있지 않습니다.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// 최대 동시 worker 수 (시작값)
    pub max_workers: usize,
    /// 최소 동시 worker 수 (바닥값)
    pub min_workers: usize,
    /// 쓰로틀링 감지 시 줄이는 worker 수
    pub worker_step: usize,
    /// 쓰로틀링 판정 임계 비율 (시도 대비 쓰로틀 실패, 0~1)
    pub throttle_threshold: f64,
    /// 쓰로틀링 감지 후 대기 시간 (초)
    pub backoff_secs: u64,
    /// 저장된 시세가 없는 종목의 기본 조회 기간 (일)
    pub lookback_days: i64,
}

/// 데몬 모드 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 전체 갱신 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            min_workers: 2,
            worker_step: 2,
            throttle_threshold: 0.10,
            backoff_secs: 15,
            lookback_days: 180,
        }
    }
}

impl RefresherConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            RefresherError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })?;

        let config = Self {
            database_url,
            refresh: RefreshConfig {
                max_workers: env_var_parse("REFRESH_MAX_WORKERS", 8),
                min_workers: env_var_parse("REFRESH_MIN_WORKERS", 2),
                worker_step: env_var_parse("REFRESH_WORKER_STEP", 2),
                throttle_threshold: env_var_parse("REFRESH_THROTTLE_THRESHOLD", 0.10),
                backoff_secs: env_var_parse("REFRESH_BACKOFF_SECS", 15),
                lookback_days: env_var_parse("REFRESH_LOOKBACK_DAYS", 180),
            },
            daemon: DaemonConfig {
                interval_minutes: env_var_parse("DAEMON_INTERVAL_MINUTES", 1440),
            },
        };

        config.refresh.validate()?;
        Ok(config)
    }
}

impl RefreshConfig {
    /// 쓰로틀링 감지 후 대기 시간을 Duration으로 반환
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 {
            return Err(RefresherError::Config(
                "REFRESH_MIN_WORKERS는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.max_workers < self.min_workers {
            return Err(RefresherError::Config(format!(
                "REFRESH_MAX_WORKERS({})는 REFRESH_MIN_WORKERS({}) 이상이어야 합니다",
                self.max_workers, self.min_workers
            )));
        }
        if self.worker_step == 0 {
            return Err(RefresherError::Config(
                "REFRESH_WORKER_STEP은 1 이상이어야 합니다".to_string(),
            ));
        }
        if !(self.throttle_threshold > 0.0 && self.throttle_threshold < 1.0) {
            return Err(RefresherError::Config(format!(
                "REFRESH_THROTTLE_THRESHOLD({})는 0과 1 사이여야 합니다",
                self.throttle_threshold
            )));
        }
        if self.lookback_days <= 0 {
            return Err(RefresherError::Config(
                "REFRESH_LOOKBACK_DAYS는 1 이상이어야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

impl DaemonConfig {
    /// 전체 갱신 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
