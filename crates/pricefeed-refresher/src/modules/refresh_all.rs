//! 적응형 일괄 갱신 orchestrator.
//!
//! 전체 활성 종목에 대해 단일 종목 갱신을 제한된 worker 풀로 분산
//! 실행합니다. 반복(iteration)마다:
//!
//! 1. 남은 종목 전부를 현재 worker 수 한도 내에서 동시 실행
//! 2. 완료 순서대로 결과를 수집하여 성공/실패로 분류
//! 3. 쓰로틀 실패 비율이 임계치를 넘으면 worker 수를 한 단계 줄이고
//!    대기 후 실패분만 재시도
//! 4. 쓰로틀링 징후가 없으면 남은 실패를 영구 실패로 보고 종료
//!
//! 개별 종목의 실패는 절대 전체 실행을 중단시키지 않습니다. 종료 시
//! 실행 기록(refresh_runs) 한 행이 기록됩니다.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::postgres::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use pricefeed_core::{Instrument, RunKind};
use pricefeed_data::{
    FailedUpdateRepository, InstrumentRepository, ProviderRegistry, RefreshRunRepository,
};

use crate::config::{RefreshConfig, RefresherConfig};
use crate::error::RefresherError;
use crate::stats::RefreshStats;
use crate::Result;

use super::refresh_one::{FailureKind, InstrumentRefresher, SourceRefresher};

/// 반복 간 동시성을 조절하는 컨트롤러.
///
/// worker 수는 `max_workers`에서 시작해 쓰로틀링이 감지될 때마다
/// `worker_step`씩 줄어들며, `min_workers` 밑으로는 내려가지 않습니다.
#[derive(Debug)]
pub struct WorkerController {
    current: usize,
    min_workers: usize,
    step: usize,
    threshold: f64,
}

impl WorkerController {
    pub fn new(config: &RefreshConfig) -> Self {
        Self {
            current: config.max_workers,
            min_workers: config.min_workers,
            step: config.worker_step,
            threshold: config.throttle_threshold,
        }
    }

    /// 현재 worker 수.
    pub fn current(&self) -> usize {
        self.current
    }

    /// 이번 반복이 쓰로틀링으로 판정되는지 확인합니다.
    ///
    /// 쓰로틀 실패가 시도 수의 임계 비율을 "초과"해야 참입니다
    /// (정확히 임계 비율인 경우는 판정되지 않음).
    pub fn is_throttled(&self, attempted: usize, throttled: usize) -> bool {
        attempted > 0 && (throttled as f64) > self.threshold * (attempted as f64)
    }

    /// worker 수를 한 단계 줄입니다.
    ///
    /// 이미 바닥(`min_workers`)이면 줄이지 않고 `false`를 반환합니다.
    /// 이것이 "동시성이 바닥났다"는 종료 신호입니다.
    pub fn step_down(&mut self) -> bool {
        if self.current <= self.min_workers {
            return false;
        }
        self.current = self.current.saturating_sub(self.step).max(self.min_workers);
        true
    }
}

/// 일괄 갱신 결과.
#[derive(Debug)]
pub struct BatchOutcome {
    /// 집계 통계
    pub stats: RefreshStats,
    /// 종료 시점까지 실패로 남은 종목 심볼
    pub pending: Vec<String>,
}

/// 적응형 갱신 루프를 실행합니다.
///
/// `refresher` 추상화 덕분에 DB 없이 스크립트된 구현으로도 루프의
/// 동작을 검증할 수 있습니다. 종목 간 순서는 보장하지 않으며 결과는
/// 완료 순서대로 처리됩니다.
pub async fn run_batch<R>(
    refresher: Arc<R>,
    instruments: Vec<Instrument>,
    config: &RefreshConfig,
    run_kind: RunKind,
) -> BatchOutcome
where
    R: InstrumentRefresher + 'static,
{
    let start = Instant::now();
    let mut stats = RefreshStats::new();
    stats.total = instruments.len();

    let mut controller = WorkerController::new(config);
    let mut pending = instruments;

    while !pending.is_empty() {
        stats.iterations += 1;
        let attempted = pending.len();
        let workers = controller.current();

        info!(
            iteration = stats.iterations,
            pending = attempted,
            workers = workers,
            "갱신 반복 시작"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<(Instrument, std::result::Result<u64, super::RefreshFailure>)> =
            JoinSet::new();

        for instrument in pending.drain(..) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("세마포어 획득 실패");
            let refresher = Arc::clone(&refresher);
            tasks.spawn(async move {
                let result = refresher.refresh(&instrument, run_kind).await;
                drop(permit);
                (instrument, result)
            });
        }

        let mut throttled = 0usize;
        let mut failed: Vec<Instrument> = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(inserted))) => {
                    stats.updated += 1;
                    if inserted == 0 {
                        stats.empty += 1;
                    } else {
                        stats.rows_added += inserted as usize;
                    }
                }
                Ok((instrument, Err(failure))) => {
                    if failure.kind == FailureKind::Throttled {
                        throttled += 1;
                        stats.throttled += 1;
                    }
                    warn!(
                        symbol = %instrument.symbol,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "종목 갱신 실패"
                    );
                    failed.push(instrument);
                }
                Err(join_err) => {
                    // worker panic은 해당 종목의 실패로만 취급하고 전체는 계속
                    error!(error = %join_err, "갱신 작업 비정상 종료");
                }
            }
        }

        pending = failed;

        if pending.is_empty() {
            break;
        }

        if !controller.is_throttled(attempted, throttled) {
            info!(
                failed = pending.len(),
                "쓰로틀링 징후 없음 - 남은 실패는 재시도 없이 종료"
            );
            break;
        }

        if !controller.step_down() {
            warn!(
                workers = controller.current(),
                "동시성이 최소치에 도달 - 갱신 중단"
            );
            break;
        }

        info!(
            workers = controller.current(),
            backoff_secs = config.backoff_secs,
            "쓰로틀링 감지 - 동시성 축소 후 대기"
        );
        tokio::time::sleep(config.backoff()).await;
    }

    stats.failed = stats.total - stats.updated;
    stats.elapsed = start.elapsed();

    BatchOutcome {
        stats,
        pending: pending.into_iter().map(|i| i.symbol).collect(),
    }
}

/// 전체 활성 종목을 갱신하고 실행 기록을 남깁니다.
///
/// 실행 기록(refresh_runs)은 루프 종료 후 정확히 한 번 기록됩니다.
pub async fn refresh_all(
    pool: &PgPool,
    config: &RefresherConfig,
    registry: Arc<ProviderRegistry>,
    run_kind: RunKind,
) -> Result<RefreshStats> {
    let started_at = Utc::now();

    let instruments: Vec<Instrument> = InstrumentRepository::new(pool.clone())
        .list_active()
        .await?
        .iter()
        .map(|record| record.to_instrument())
        .collect();

    if instruments.is_empty() {
        warn!("갱신할 활성 종목이 없습니다");
    }

    let refresher = Arc::new(SourceRefresher::new(
        pool.clone(),
        registry,
        config.refresh.lookback_days,
    ));

    let outcome = run_batch(refresher, instruments, &config.refresh, run_kind).await;
    let finished_at = Utc::now();

    RefreshRunRepository::new(pool.clone())
        .record_run(
            started_at,
            finished_at,
            outcome.stats.total as i32,
            outcome.stats.updated as i32,
            run_kind,
        )
        .await?;

    if !outcome.pending.is_empty() {
        warn!(symbols = ?outcome.pending, "미해결 실패로 남은 종목");
    }

    Ok(outcome.stats)
}

/// 단일 종목을 수동으로 갱신합니다 (적응형 루프 밖의 직접 호출).
///
/// 존재하지 않는 심볼은 종목 참조 없는 실패 기록으로 남깁니다.
pub async fn refresh_symbol(
    pool: &PgPool,
    config: &RefresherConfig,
    registry: Arc<ProviderRegistry>,
    symbol: &str,
    run_kind: RunKind,
) -> Result<u64> {
    let record = InstrumentRepository::new(pool.clone())
        .find_by_symbol(symbol)
        .await?;

    let Some(record) = record else {
        let message = format!("등록되지 않은 심볼: {}", symbol);
        FailedUpdateRepository::new(pool.clone())
            .record(None, None, run_kind, &message)
            .await?;
        return Err(RefresherError::NotFound(message));
    };

    let instrument = record.to_instrument();
    let refresher = SourceRefresher::new(pool.clone(), registry, config.refresh.lookback_days);

    refresher
        .refresh(&instrument, run_kind)
        .await
        .map_err(|failure| RefresherError::Source(failure.message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::super::RefreshFailure;

    fn test_config() -> RefreshConfig {
        RefreshConfig {
            max_workers: 4,
            min_workers: 1,
            worker_step: 2,
            throttle_threshold: 0.10,
            backoff_secs: 0,
            lookback_days: 180,
        }
    }

    fn instrument(id: i64, symbol: &str) -> Instrument {
        Instrument {
            id,
            symbol: symbol.to_string(),
            name: None,
            source_id: 1,
            source_code: "YAHOO".to_string(),
            source_symbol: symbol.to_string(),
        }
    }

    fn throttled() -> RefreshFailure {
        RefreshFailure {
            kind: FailureKind::Throttled,
            message: "Rate limit exceeded".to_string(),
        }
    }

    fn transient() -> RefreshFailure {
        RefreshFailure {
            kind: FailureKind::Transient,
            message: "Source unavailable: connection reset".to_string(),
        }
    }

    /// 심볼별로 미리 정해둔 결과를 순서대로 돌려주는 테스트 구현.
    ///
    /// 스크립트가 소진된 심볼은 1행 성공으로 처리합니다.
    struct ScriptedRefresher {
        script: Mutex<HashMap<String, VecDeque<std::result::Result<u64, RefreshFailure>>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedRefresher {
        fn new(
            script: Vec<(&str, Vec<std::result::Result<u64, RefreshFailure>>)>,
        ) -> Self {
            let script = script
                .into_iter()
                .map(|(symbol, outcomes)| (symbol.to_string(), outcomes.into_iter().collect()))
                .collect();
            Self {
                script: Mutex::new(script),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn observed_max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InstrumentRefresher for ScriptedRefresher {
        async fn refresh(
            &self,
            instrument: &Instrument,
            _run_kind: RunKind,
        ) -> std::result::Result<u64, RefreshFailure> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            // 동시 실행이 실제로 겹치도록 잠시 양보
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;

            let result = {
                let mut script = self.script.lock().unwrap();
                script
                    .get_mut(&instrument.symbol)
                    .and_then(|queue| queue.pop_front())
                    .unwrap_or(Ok(1))
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn test_controller_steps_down_to_floor() {
        let config = RefreshConfig {
            max_workers: 8,
            min_workers: 2,
            worker_step: 3,
            ..test_config()
        };
        let mut controller = WorkerController::new(&config);
        assert_eq!(controller.current(), 8);

        assert!(controller.step_down());
        assert_eq!(controller.current(), 5);

        // 5 - 3 = 2, 정확히 바닥
        assert!(controller.step_down());
        assert_eq!(controller.current(), 2);

        // 바닥에서는 더 줄지 않음
        assert!(!controller.step_down());
        assert_eq!(controller.current(), 2);
    }

    #[test]
    fn test_controller_never_below_minimum() {
        let config = RefreshConfig {
            max_workers: 5,
            min_workers: 2,
            worker_step: 10,
            ..test_config()
        };
        let mut controller = WorkerController::new(&config);
        assert!(controller.step_down());
        // step이 커도 바닥에서 멈춘다
        assert_eq!(controller.current(), 2);
    }

    #[test]
    fn test_throttle_threshold_is_strict() {
        let controller = WorkerController::new(&test_config());
        // 정확히 10%는 판정되지 않음
        assert!(!controller.is_throttled(10, 1));
        // 초과해야 판정
        assert!(controller.is_throttled(10, 2));
        assert!(!controller.is_throttled(0, 0));
    }

    #[tokio::test]
    async fn test_all_success_single_iteration() {
        let refresher = Arc::new(ScriptedRefresher::new(vec![]));
        let instruments = (1..=5).map(|i| instrument(i, &format!("S{}", i))).collect();

        let outcome = run_batch(
            refresher,
            instruments,
            &test_config(),
            RunKind::Scheduled,
        )
        .await;

        assert_eq!(outcome.stats.total, 5);
        assert_eq!(outcome.stats.updated, 5);
        assert_eq!(outcome.stats.failed, 0);
        assert_eq!(outcome.stats.iterations, 1);
        assert!(outcome.pending.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_worker_count() {
        let refresher = Arc::new(ScriptedRefresher::new(vec![]));
        let instruments = (1..=20).map(|i| instrument(i, &format!("S{}", i))).collect();

        let config = RefreshConfig {
            max_workers: 3,
            ..test_config()
        };
        let outcome = run_batch(
            Arc::clone(&refresher),
            instruments,
            &config,
            RunKind::Scheduled,
        )
        .await;

        assert_eq!(outcome.stats.updated, 20);
        assert!(refresher.observed_max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn test_end_to_end_throttle_then_recover() {
        // 10종목 중 2종목이 1차에서 429 → 20% > 10% 임계치
        // 2차는 실패분 2종목만 축소된 동시성으로 재시도하여 성공
        let refresher = Arc::new(ScriptedRefresher::new(vec![
            ("S1", vec![Err(throttled()), Ok(3)]),
            ("S2", vec![Err(throttled()), Ok(2)]),
        ]));
        let instruments: Vec<Instrument> =
            (1..=10).map(|i| instrument(i, &format!("S{}", i))).collect();

        let outcome = run_batch(
            refresher,
            instruments,
            &test_config(),
            RunKind::Scheduled,
        )
        .await;

        assert_eq!(outcome.stats.total, 10);
        assert_eq!(outcome.stats.updated, 10);
        assert_eq!(outcome.stats.failed, 0);
        assert_eq!(outcome.stats.iterations, 2);
        assert_eq!(outcome.stats.throttled, 2);
        assert!(outcome.pending.is_empty());
    }

    #[tokio::test]
    async fn test_failure_isolation_without_throttling() {
        // 쓰로틀링이 아닌 단일 실패는 다른 종목의 성공에 영향 없이
        // 재시도 없이 종료된다
        let refresher = Arc::new(ScriptedRefresher::new(vec![(
            "BAD",
            vec![Err(transient())],
        )]));
        let instruments = vec![
            instrument(1, "GOOD1"),
            instrument(2, "BAD"),
            instrument(3, "GOOD2"),
        ];

        let outcome = run_batch(
            refresher,
            instruments,
            &test_config(),
            RunKind::Scheduled,
        )
        .await;

        assert_eq!(outcome.stats.updated, 2);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.iterations, 1);
        assert_eq!(outcome.pending, vec!["BAD".to_string()]);
    }

    #[tokio::test]
    async fn test_loop_stops_when_concurrency_bottoms_out() {
        // 단일 종목이 계속 429 → 매 반복 쓰로틀 판정 → 바닥 도달 후 종료
        let refresher = Arc::new(ScriptedRefresher::new(vec![(
            "S1",
            vec![
                Err(throttled()),
                Err(throttled()),
                Err(throttled()),
                Err(throttled()),
            ],
        )]));

        let config = RefreshConfig {
            max_workers: 4,
            min_workers: 2,
            worker_step: 2,
            ..test_config()
        };
        let outcome = run_batch(
            refresher,
            vec![instrument(1, "S1")],
            &config,
            RunKind::Scheduled,
        )
        .await;

        // 4 worker로 1회, 2 worker로 1회 시도 후 바닥 판정으로 종료
        assert_eq!(outcome.stats.iterations, 2);
        assert_eq!(outcome.stats.updated, 0);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.pending, vec!["S1".to_string()]);
    }

    #[tokio::test]
    async fn test_completion_accounting() {
        // updated + 미해결 실패 수 == total
        let refresher = Arc::new(ScriptedRefresher::new(vec![
            ("F1", vec![Err(transient())]),
            ("F2", vec![Err(transient())]),
        ]));
        let instruments: Vec<Instrument> =
            (1..=6).map(|i| instrument(i, &format!("F{}", i))).collect();

        let outcome = run_batch(
            refresher,
            instruments,
            &test_config(),
            RunKind::Manual,
        )
        .await;

        assert_eq!(
            outcome.stats.updated + outcome.pending.len(),
            outcome.stats.total
        );
        assert_eq!(outcome.stats.failed, outcome.pending.len());
    }
}
