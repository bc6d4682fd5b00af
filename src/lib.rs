pub mod api_server;
pub mod app;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod ics;
pub mod merge;
pub mod storage;
pub mod sync;
pub mod translate;

use env_logger::Env;

/// Environment variable consulted when `RUST_LOG` is not set.
pub const LOG_LEVEL_ENV: &str = "ICSFUSION_LOG_LEVEL";

/// Install the global logger.
///
/// `RUST_LOG` wins over `level`, which wins over `ICSFUSION_LOG_LEVEL`;
/// the fallback is `info`. Safe to call more than once.
pub fn init_logger(level: Option<&str>) {
    let default_level = level
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_LEVEL_ENV).ok())
        .unwrap_or_else(|| "info".to_string());

    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            use chrono::Local;
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}

// Re-export commonly used types
pub use config::Config;
pub use fetch::{FetchError, FetchOrchestrator, FetchPolicy, Fetcher, HttpFetcher, SourceSpec, SyncOutcome};
pub use merge::{merge, LabeledSource, MergeEngine, MergedDocument};
pub use storage::{DocumentSlot, DocumentStore, FileStore};
pub use sync::{cancel_pair, run_periodic, CancelHandle, CancelToken, SyncPipeline, SyncReport};
pub use translate::{translate, TranslationOverlay};
