//! 갱신 워크플로우 모듈.

pub mod refresh_all;
pub mod refresh_one;

pub use refresh_all::{refresh_all, refresh_symbol, run_batch, BatchOutcome, WorkerController};
pub use refresh_one::{
    fetch_window, FailureKind, InstrumentRefresher, RefreshFailure, SourceRefresher,
};
