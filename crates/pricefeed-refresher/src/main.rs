//! Standalone price refresher CLI.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use pricefeed_core::{init_logging, LogConfig, RunKind};
use pricefeed_data::{
    Database, DatabaseConfig, FailedUpdateRepository, ProviderRegistry, RefreshRunRepository,
};
use pricefeed_refresher::{modules, RefresherConfig};

#[derive(Parser)]
#[command(name = "pricefeed-refresher")]
#[command(about = "PriceFeed Historical Price Refresher", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 전체 활성 종목 가격 갱신 (수동 실행)
    RefreshAll,

    /// 단일 종목 가격 갱신 (적응형 루프 밖의 직접 재시도)
    Refresh {
        /// 갱신할 종목 심볼
        #[arg(long)]
        symbol: String,
    },

    /// 최근 실패 기록 조회
    Failures {
        /// 조회할 최대 건수
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// 실패 기록을 해결됨으로 표시
    Resolve {
        /// 실패 기록 ID
        #[arg(long)]
        id: i64,
    },

    /// 최근 갱신 실행 기록 조회
    Runs {
        /// 조회할 최대 건수
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// 데몬 모드: 주기적으로 전체 갱신 실행
    Daemon,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 로깅 초기화 (RUST_LOG가 있으면 우선)
    let log_config = LogConfig {
        level: cli.log_level.clone(),
        ..LogConfig::from_env()
    };
    init_logging(log_config)?;

    tracing::info!("PriceFeed Refresher 시작");

    // 설정 로드
    let config = RefresherConfig::from_env()?;

    // DB 연결 및 마이그레이션
    let db = Database::connect(&DatabaseConfig::new(&config.database_url)).await?;
    db.health_check().await?;
    db.migrate().await?;
    let pool = db.pool().clone();

    // 소스 어댑터 레지스트리 (기본: YAHOO)
    let registry = Arc::new(ProviderRegistry::with_defaults());
    tracing::debug!(sources = ?registry.codes(), "소스 어댑터 등록 완료");

    match cli.command {
        Commands::RefreshAll => {
            let stats =
                modules::refresh_all(&pool, &config, registry, RunKind::Manual).await?;
            stats.log_summary("전체 갱신");
        }
        Commands::Refresh { symbol } => {
            let inserted =
                modules::refresh_symbol(&pool, &config, registry, &symbol, RunKind::Manual)
                    .await?;
            tracing::info!(symbol = %symbol, inserted = inserted, "종목 갱신 완료");
        }
        Commands::Failures { limit } => {
            let repository = FailedUpdateRepository::new(pool.clone());
            let failures = repository.list_recent(limit).await?;
            println!(
                "{:<6} {:<12} {:<10} {:<26} {:<9} error",
                "id", "instrument", "kind", "timestamp", "resolved"
            );
            for f in failures {
                println!(
                    "{:<6} {:<12} {:<10} {:<26} {:<9} {}",
                    f.id,
                    f.instrument_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    f.run_kind,
                    f.run_timestamp.to_rfc3339(),
                    f.resolved,
                    f.error_message.as_deref().unwrap_or("-"),
                );
            }
            let unresolved = repository.unresolved_count().await?;
            println!("unresolved: {}", unresolved);
        }
        Commands::Resolve { id } => {
            let resolved = FailedUpdateRepository::new(pool.clone())
                .mark_resolved(id)
                .await?;
            if resolved {
                tracing::info!(id = id, "실패 기록 해결 처리 완료");
            } else {
                tracing::warn!(id = id, "해당 ID의 미해결 실패 기록이 없습니다");
            }
        }
        Commands::Runs { limit } => {
            let runs = RefreshRunRepository::new(pool.clone())
                .list_recent(limit)
                .await?;
            println!(
                "{:<6} {:<26} {:<26} {:<7} {:<8} kind",
                "id", "started", "finished", "total", "updated"
            );
            for run in runs {
                println!(
                    "{:<6} {:<26} {:<26} {:<7} {:<8} {}",
                    run.id,
                    run.started_at.to_rfc3339(),
                    run.finished_at.to_rfc3339(),
                    run.total_instruments,
                    run.updated_instruments,
                    run.run_kind,
                );
            }
        }
        Commands::Daemon => {
            tracing::info!(
                "=== 데몬 모드 시작 (주기: {}분) ===",
                config.daemon.interval_minutes
            );

            let mut interval = tokio::time::interval(config.daemon.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("종료 신호 수신, 데몬 종료 중...");
                        break;
                    }
                    _ = interval.tick() => {
                        tracing::info!("=== 정기 갱신 시작 ===");
                        match modules::refresh_all(
                            &pool,
                            &config,
                            Arc::clone(&registry),
                            RunKind::Scheduled,
                        )
                        .await
                        {
                            Ok(stats) => {
                                stats.log_summary("정기 갱신");
                            }
                            Err(e) => {
                                tracing::error!("정기 갱신 실패: {}", e);
                            }
                        }
                        tracing::info!(
                            "=== 정기 갱신 완료, 다음 실행: {}분 후 ===",
                            config.daemon.interval_minutes
                        );
                    }
                }
            }
        }
    }

    pool.close().await;
    tracing::info!("PriceFeed Refresher 종료");

    Ok(())
}
