use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api_server::{start_api_server, ApiState};
use crate::cli::{Commands, ConfigActions};
use crate::config::Config;
use crate::fetch::{FetchOrchestrator, HttpFetcher};
use crate::merge::{LabeledSource, MergeEngine};
use crate::storage::FileStore;
use crate::sync::{cancel_pair, run_periodic, CancelHandle, CancelToken, SyncPipeline};
use crate::translate::TranslationOverlay;

pub struct Application {
    config: Config,
    config_path: PathBuf,
}

impl Application {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self { config, config_path }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn file_store(&self) -> FileStore {
        let storage = &self.config.storage;
        FileStore::new(&storage.data_dir, &storage.merged_file, &storage.translated_file)
    }

    pub fn translation_overlay(&self) -> Result<TranslationOverlay> {
        let overlay = TranslationOverlay::new(self.config.translation.phrases.clone())
            .context("Invalid translation dictionary")?;
        Ok(overlay.with_origin_labels(self.config.origin_labels()))
    }

    pub fn merge_engine(&self) -> MergeEngine {
        MergeEngine::new(self.config.primary_origin().unwrap_or_default())
            .with_header(self.config.calendar_header())
    }

    /// Wire the configured sources, fetcher, engine and store together.
    pub fn build_pipeline(&self) -> Result<SyncPipeline<HttpFetcher>> {
        if self.config.sources.is_empty() {
            warn!("No sources configured in {}", self.config_path.display());
        }

        let fetcher = HttpFetcher::new(&self.config.fetch.user_agent)?;
        let orchestrator = FetchOrchestrator::new(fetcher, self.config.fetch_policy());
        let mut pipeline = SyncPipeline::new(
            orchestrator,
            self.merge_engine(),
            Arc::new(self.file_store()),
            self.config.source_specs(),
        );
        if self.config.sync.translate {
            pipeline = pipeline.with_translation(self.translation_overlay()?);
        }
        Ok(pipeline)
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Sync => self.sync_once().await,
            Commands::Watch => self.watch().await,
            Commands::Serve { host, port, no_sync } => self.serve(host, port, no_sync).await,
            Commands::Merge { inputs, primary, output } => {
                let merged = merge_files(&inputs, primary.as_deref(), &self.config)?;
                write_output(output.as_deref(), &merged)
            }
            Commands::Translate { file, output } => {
                let input = fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
                let translated = self.translation_overlay()?.translate(&input);
                write_output(output.as_deref(), &translated)
            }
            Commands::Config { action } => match action {
                ConfigActions::Show => {
                    print!("{}", toml::to_string_pretty(&self.config)?);
                    Ok(())
                }
                ConfigActions::Path => {
                    println!("{}", self.config_path.display());
                    Ok(())
                }
            },
        }
    }

    async fn sync_once(&self) -> Result<()> {
        let pipeline = self.build_pipeline()?;
        let report = pipeline.run(&CancelToken::never()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.sources_failed > 0 {
            warn!("{} source(s) failed", report.sources_failed);
        }
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        let pipeline = Arc::new(self.build_pipeline()?);
        let (handle, token) = cancel_pair();
        spawn_ctrl_c(handle);

        info!("Syncing every {} minute(s), press Ctrl-C to stop", self.config.sync.interval_minutes);
        run_periodic(pipeline, self.config.sync_interval(), token).await;
        Ok(())
    }

    async fn serve(&self, host: Option<String>, port: Option<u16>, no_sync: bool) -> Result<()> {
        let pipeline = Arc::new(self.build_pipeline()?);
        let (handle, token) = cancel_pair();
        spawn_ctrl_c(handle);

        let sync_task = if no_sync {
            None
        } else {
            Some(tokio::spawn(run_periodic(pipeline.clone(), self.config.sync_interval(), token.clone())))
        };

        let addr = format!(
            "{}:{}",
            host.unwrap_or_else(|| self.config.server.host.clone()),
            port.unwrap_or(self.config.server.port)
        );
        let mut shutdown = token;
        let state = Arc::new(ApiState::new(pipeline));
        start_api_server(state, &addr, async move { shutdown.cancelled().await }).await?;

        if let Some(task) = sync_task {
            task.await.map_err(|e| anyhow!("Sync task failed: {}", e))?;
        }
        Ok(())
    }
}

fn spawn_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current run");
            handle.cancel();
        }
    });
}

/// Merge local files given as `(origin, path)` pairs. The primary origin
/// defaults to the first input.
pub fn merge_files(inputs: &[(String, PathBuf)], primary: Option<&str>, config: &Config) -> Result<String> {
    let first = inputs.first().ok_or_else(|| anyhow!("At least one input file is required"))?;
    let primary = primary.unwrap_or(&first.0);
    if !inputs.iter().any(|(origin, _)| origin == primary) {
        return Err(anyhow!("Primary origin '{}' is not one of the inputs", primary));
    }

    let sources = inputs
        .iter()
        .map(|(origin, path)| {
            let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(LabeledSource::new(origin.clone(), text))
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = MergeEngine::new(primary).with_header(config.calendar_header()).merge(&sources);
    info!("Merged {} event(s) from {} file(s)", merged.len(), sources.len());
    Ok(merged.to_ics())
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", contents),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_merge_files_primary_defaults_to_first() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.ics");
        let b = dir.path().join("b.ics");
        fs::write(&a, "BEGIN:VEVENT\nUID:1\nSUMMARY:From A\nEND:VEVENT\n")?;
        fs::write(&b, "BEGIN:VEVENT\nUID:1\nSUMMARY:From B\nEND:VEVENT\n")?;
        let inputs = vec![("a".to_string(), a), ("b".to_string(), b)];

        let merged = merge_files(&inputs, None, &Config::default())?;
        assert!(merged.contains("SUMMARY:From A\r\n"));

        let merged = merge_files(&inputs, Some("b"), &Config::default())?;
        assert!(merged.contains("SUMMARY:From B\r\n"));
        assert!(!merged.contains("From A"));
        Ok(())
    }

    #[test]
    fn test_merge_files_unknown_primary() {
        let inputs = vec![("a".to_string(), PathBuf::from("a.ics"))];
        assert!(merge_files(&inputs, Some("z"), &Config::default()).is_err());
    }

    #[test]
    fn test_build_pipeline_from_config() -> Result<()> {
        let dir = tempdir()?;
        let mut config = Config::from_toml(
            "[[sources]]\norigin = \"airbnb\"\nurl = \"https://www.airbnb.com/calendar/ical/1.ics\"\n",
        )?;
        config.storage.data_dir = dir.path().to_path_buf();
        let app = Application::new(config, dir.path().join("config.toml"));

        let pipeline = app.build_pipeline()?;
        assert_eq!(pipeline.sources().len(), 1);
        assert_eq!(app.merge_engine().primary_origin(), "airbnb");
        assert_eq!(app.file_store().dir(), dir.path());
        Ok(())
    }
}
