//! OutputWriter - persists each cycle and gates alert uploads

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::artifact::{Artifact, DetectorGroup};
use super::loudest::loudest_union;
use super::naming::artifact_path;
use crate::collab::{AlertSink, BackgroundEstimator, CoincidenceResult, NoiseSpectrum, foreground_ifar};
use crate::config::{BackgroundConfig, Config};
use crate::domain::{CombinedResult, CycleWindow, StatusMap};

/// Errors persisting a cycle's artifact
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write artifact {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What happens to a cycle's foreground candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertDecision {
    /// No foreground candidate this cycle
    NoCandidate,
    /// Candidate kept locally only
    ArchiveOnly { ifar: f64 },
    /// Candidate submitted through the alert sink
    Upload { ifar: f64 },
}

impl AlertDecision {
    /// Upload only when uploads are enabled and the IFAR strictly exceeds the threshold
    pub fn for_result(coincidence: &CoincidenceResult, config: &BackgroundConfig) -> Self {
        match foreground_ifar(coincidence) {
            None => Self::NoCandidate,
            Some(ifar) if config.enable_upload && ifar > config.ifar_upload_threshold => Self::Upload { ifar },
            Some(ifar) => Self::ArchiveOnly { ifar },
        }
    }
}

/// Record of one cycle's output
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    pub path: PathBuf,
    pub decision: AlertDecision,
    /// Detectors present in the merged result
    pub detectors: Vec<String>,
}

/// Running totals over a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub artifacts_written: u64,
    pub uploads: u64,
    pub archived_candidates: u64,
    pub sink_failures: u64,
}

/// Coordinator-side output stage
pub struct OutputWriter {
    config: Arc<Config>,
    background: Option<Box<dyn BackgroundEstimator>>,
    sink: Option<Box<dyn AlertSink>>,
    stats: OutputStats,
}

impl OutputWriter {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            background: None,
            sink: None,
            stats: OutputStats::default(),
        }
    }

    /// Attach a background estimator; it is only consulted when enabled in config
    pub fn with_background(mut self, background: Box<dyn BackgroundEstimator>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stats(&self) -> &OutputStats {
        &self.stats
    }

    /// Path the artifact for `window` is written to
    pub fn path_for(&self, window: &CycleWindow) -> PathBuf {
        let output = &self.config.output;
        artifact_path(
            &output.directory,
            &self.config.detector_names(),
            &output.label,
            window,
            output.date_bucketing,
        )
    }

    /// Persist one cycle and hand any candidate to the alert sink
    ///
    /// Only a failure to write the artifact is an error; sink failures are logged.
    pub async fn write_cycle(
        &mut self,
        window: &CycleWindow,
        combined: &CombinedResult,
        statuses: &StatusMap,
        psds: &BTreeMap<String, NoiseSpectrum>,
    ) -> Result<CycleOutput, OutputError> {
        debug!(%window, detectors = combined.len(), "OutputWriter::write_cycle: called");

        let coincidence = match (&mut self.background, self.config.background.enabled) {
            (Some(background), true) => background.add_singles(combined, statuses),
            _ => CoincidenceResult::new(),
        };

        let artifact = self.build_artifact(combined, psds, coincidence);
        let path = self.path_for(window);
        write_atomic(&path, &artifact).await?;
        self.stats.artifacts_written += 1;
        info!(%window, path = %path.display(), "Wrote cycle artifact");

        let decision = AlertDecision::for_result(&artifact.coincidence, &self.config.background);
        self.dispatch(window, &path, psds, decision).await;

        Ok(CycleOutput {
            path,
            decision,
            detectors: combined.keys().cloned().collect(),
        })
    }

    fn build_artifact(
        &self,
        combined: &CombinedResult,
        psds: &BTreeMap<String, NoiseSpectrum>,
        coincidence: CoincidenceResult,
    ) -> Artifact {
        let output = &self.config.output;
        let groups = combined
            .iter()
            .map(|(ifo, triggers)| {
                let loudest = output.store_loudest.and_then(|k| {
                    let retained = loudest_union(triggers, k);
                    if retained.is_none() && !triggers.is_empty() {
                        warn!(%ifo, "Cannot rank triggers without snr, chisq and chisq_dof");
                    }
                    retained
                });
                let psd = if output.store_psd { psds.get(ifo).cloned() } else { None };
                let group = DetectorGroup {
                    triggers: triggers.clone(),
                    loudest,
                    psd,
                };
                (ifo.clone(), group)
            })
            .collect();

        Artifact { groups, coincidence }
    }

    async fn dispatch(
        &mut self,
        window: &CycleWindow,
        path: &Path,
        psds: &BTreeMap<String, NoiseSpectrum>,
        decision: AlertDecision,
    ) {
        match decision {
            AlertDecision::NoCandidate => {}
            AlertDecision::Upload { ifar } => {
                let Some(sink) = self.sink.as_mut() else {
                    warn!(%window, ifar, "Candidate passed upload threshold but no alert sink is configured");
                    return;
                };
                let annotations = vec![
                    format!("window {}-{}", window.start, window.end),
                    format!("ifar {ifar:.4}"),
                ];
                let background = &self.config.background;
                match sink
                    .upload(
                        path,
                        psds,
                        self.config.analysis.low_frequency_cutoff,
                        background.testing,
                        &annotations,
                    )
                    .await
                {
                    Ok(()) => {
                        info!(%window, ifar, "Uploaded candidate");
                        self.stats.uploads += 1;
                    }
                    Err(e) => {
                        error!(%window, ifar, error = %e, "Candidate upload failed");
                        self.stats.sink_failures += 1;
                    }
                }
            }
            AlertDecision::ArchiveOnly { ifar } => {
                let Some(sink) = self.sink.as_mut() else {
                    debug!(%window, ifar, "No alert sink; candidate kept in artifact only");
                    return;
                };
                match sink.save(path).await {
                    Ok(()) => {
                        debug!(%window, ifar, "Archived candidate");
                        self.stats.archived_candidates += 1;
                    }
                    Err(e) => {
                        error!(%window, ifar, error = %e, "Candidate archive failed");
                        self.stats.sink_failures += 1;
                    }
                }
            }
        }
    }
}

/// Write through a temporary file so a rerun replaces the artifact in place
async fn write_atomic(path: &Path, artifact: &Artifact) -> Result<(), OutputError> {
    let persistence = |source| OutputError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(persistence)?;
    }

    let content = serde_json::to_vec(artifact)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await.map_err(persistence)?;
    fs::rename(&tmp, path).await.map_err(persistence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TriggerSet;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        uploads: Vec<(PathBuf, Vec<String>)>,
        saves: Vec<PathBuf>,
    }

    struct RecordingSink(Arc<Mutex<Calls>>);

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn upload(
            &mut self,
            artifact: &Path,
            _psds: &BTreeMap<String, NoiseSpectrum>,
            _low_frequency_cutoff: f64,
            _testing: bool,
            annotations: &[String],
        ) -> eyre::Result<()> {
            self.0
                .lock()
                .unwrap()
                .uploads
                .push((artifact.to_path_buf(), annotations.to_vec()));
            Ok(())
        }

        async fn save(&mut self, artifact: &Path) -> eyre::Result<()> {
            self.0.lock().unwrap().saves.push(artifact.to_path_buf());
            Ok(())
        }
    }

    struct FixedIfar(Option<f64>);

    impl BackgroundEstimator for FixedIfar {
        fn add_singles(&mut self, _combined: &CombinedResult, _statuses: &StatusMap) -> CoincidenceResult {
            let mut result = CoincidenceResult::new();
            if let Some(ifar) = self.0 {
                result.insert("foreground/ifar".to_string(), vec![ifar]);
            }
            result
        }
    }

    fn config(dir: &TempDir, enable_upload: bool) -> Arc<Config> {
        let mut config = Config::default();
        config.output.directory = dir.path().to_path_buf();
        config.output.store_loudest = Some(1);
        config.output.store_psd = true;
        config.background.enable_upload = enable_upload;
        config.background.ifar_upload_threshold = 2.0;
        Arc::new(config)
    }

    fn combined() -> CombinedResult {
        let arrays: BTreeMap<String, Vec<f64>> = [
            ("snr".to_string(), vec![5.0, 8.0]),
            ("chisq".to_string(), vec![10.0, 10.0]),
            ("chisq_dof".to_string(), vec![11.0, 11.0]),
        ]
        .into_iter()
        .collect();
        [("H1".to_string(), TriggerSet::new(arrays).unwrap())].into_iter().collect()
    }

    fn window() -> CycleWindow {
        CycleWindow {
            cycle: 0,
            start: 1_400_000_000,
            end: 1_400_000_008,
        }
    }

    fn writer(dir: &TempDir, enable_upload: bool, ifar: Option<f64>) -> (OutputWriter, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let writer = OutputWriter::new(config(dir, enable_upload))
            .with_background(Box::new(FixedIfar(ifar)))
            .with_sink(Box::new(RecordingSink(calls.clone())));
        (writer, calls)
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let config = BackgroundConfig {
            enable_upload: true,
            ifar_upload_threshold: 2.0,
            ..Default::default()
        };
        let at = [("foreground/ifar".to_string(), vec![2.0])].into_iter().collect();
        let above = [("foreground/ifar".to_string(), vec![2.0001])].into_iter().collect();

        assert_eq!(
            AlertDecision::for_result(&at, &config),
            AlertDecision::ArchiveOnly { ifar: 2.0 }
        );
        assert_eq!(
            AlertDecision::for_result(&above, &config),
            AlertDecision::Upload { ifar: 2.0001 }
        );
        assert_eq!(
            AlertDecision::for_result(&CoincidenceResult::new(), &config),
            AlertDecision::NoCandidate
        );
    }

    #[test]
    fn test_upload_disabled_archives() {
        let config = BackgroundConfig {
            enable_upload: false,
            ifar_upload_threshold: 1.0,
            ..Default::default()
        };
        let result = [("foreground/ifar".to_string(), vec![100.0])].into_iter().collect();
        assert_eq!(
            AlertDecision::for_result(&result, &config),
            AlertDecision::ArchiveOnly { ifar: 100.0 }
        );
    }

    #[tokio::test]
    async fn test_write_cycle_uploads_above_threshold() {
        let dir = TempDir::new().unwrap();
        let (mut writer, calls) = writer(&dir, true, Some(5.0));

        let psds = [(
            "H1".to_string(),
            NoiseSpectrum {
                delta_f: 0.25,
                values: vec![1.0, 2.0],
                distance: 130.0,
            },
        )]
        .into_iter()
        .collect();

        let output = writer
            .write_cycle(&window(), &combined(), &StatusMap::new(), &psds)
            .await
            .unwrap();

        assert_eq!(output.decision, AlertDecision::Upload { ifar: 5.0 });
        assert_eq!(output.detectors, vec!["H1"]);
        assert!(output.path.ends_with("H1L1-Live-1400000000-8.json"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.uploads.len(), 1);
        assert_eq!(calls.uploads[0].0, output.path);
        assert!(calls.saves.is_empty());

        let content = std::fs::read_to_string(&output.path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["H1"]["snr"], serde_json::json!([5.0, 8.0]));
        assert_eq!(value["H1"]["loudest"], serde_json::json!([1]));
        assert_eq!(value["H1"]["psd"]["distance"], serde_json::json!(130.0));
        assert_eq!(value["foreground/ifar"], serde_json::json!([5.0]));
        assert_eq!(writer.stats().uploads, 1);
    }

    #[tokio::test]
    async fn test_write_cycle_at_threshold_archives() {
        let dir = TempDir::new().unwrap();
        let (mut writer, calls) = writer(&dir, true, Some(2.0));

        let output = writer
            .write_cycle(&window(), &combined(), &StatusMap::new(), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(output.decision, AlertDecision::ArchiveOnly { ifar: 2.0 });
        let calls = calls.lock().unwrap();
        assert!(calls.uploads.is_empty());
        assert_eq!(calls.saves, vec![output.path.clone()]);
    }

    #[tokio::test]
    async fn test_rewrite_overwrites_same_path() {
        let dir = TempDir::new().unwrap();
        let (mut writer, _calls) = writer(&dir, false, None);

        let first = writer
            .write_cycle(&window(), &combined(), &StatusMap::new(), &BTreeMap::new())
            .await
            .unwrap();
        let second = writer
            .write_cycle(&window(), &CombinedResult::new(), &StatusMap::new(), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.path, second.path);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let content = std::fs::read_to_string(&second.path).unwrap();
        assert_eq!(content, "{}");
    }

    #[tokio::test]
    async fn test_background_disabled_skips_estimator() {
        let dir = TempDir::new().unwrap();
        let mut config = (*config(&dir, true)).clone();
        config.background.enabled = false;
        let mut writer = OutputWriter::new(Arc::new(config)).with_background(Box::new(FixedIfar(Some(50.0))));

        let output = writer
            .write_cycle(&window(), &combined(), &StatusMap::new(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(output.decision, AlertDecision::NoCandidate);
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut config = Config::default();
        config.output.directory = blocker;
        let mut writer = OutputWriter::new(Arc::new(config));

        let err = writer
            .write_cycle(&window(), &combined(), &StatusMap::new(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OutputError::Persistence { .. }));
    }
}
