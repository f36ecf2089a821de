//! Synthetic collaborators for running the pool without live data
//!
//! Every detector's stream is seeded from the detector alone, so all ranks
//! observe the same data for it, as they would reading a shared frame stream.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::collab::{
    AdvanceStatus, AlertSink, BackgroundEstimator, CoincidenceResult, FOREGROUND_IFAR_KEY, FilterEngine,
    NoiseSpectrum, StreamingDataSource,
};
use crate::config::{Config, SimulationConfig};
use crate::cycle::SourceMap;
use crate::domain::{CombinedResult, DetectorResult, GpsTime, StatusMap, TriggerSet};
use crate::launch::ProcessFactory;
use crate::shard::TemplateShard;

const PSD_SAMPLES: usize = 64;
const PSD_DELTA_F: f64 = 0.25;
const CHISQ_DOF: f64 = 16.0;

/// Seeded stand-in for a conditioned detector stream
pub struct SyntheticSource {
    ifo: String,
    end: GpsTime,
    windows: u64,
    psd: Option<NoiseSpectrum>,
    params: SimulationConfig,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(ifo: &str, start: GpsTime, params: SimulationConfig, seed: u64) -> Self {
        Self {
            ifo: ifo.to_string(),
            end: start,
            windows: 0,
            psd: None,
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl StreamingDataSource for SyntheticSource {
    async fn advance(&mut self, length: u64, _timeout: Duration) -> AdvanceStatus {
        self.end += length;
        self.windows += 1;

        if self.rng.random_bool(self.params.dropout_probability.clamp(0.0, 1.0)) {
            debug!(ifo = %self.ifo, end = self.end, "SyntheticSource::advance: dropout");
            return AdvanceStatus::Unavailable;
        }

        let refresh = self.params.psd_refresh_windows.max(1);
        if self.psd.is_none() || self.windows % refresh == 0 {
            AdvanceStatus::NeedsPsdRecalculation
        } else {
            AdvanceStatus::Ready
        }
    }

    async fn recalculate_psd(&mut self) -> bool {
        let jitter = self.params.distance_jitter.abs();
        let distance = self.params.base_distance + self.rng.random_range(-jitter..=jitter);
        let values = (0..PSD_SAMPLES)
            .map(|i| 1e-46 * (1.0 + self.rng.random::<f64>()) / (1.0 + i as f64 * PSD_DELTA_F))
            .collect();
        debug!(ifo = %self.ifo, distance, "SyntheticSource::recalculate_psd: called");
        self.psd = Some(NoiseSpectrum {
            delta_f: PSD_DELTA_F,
            values,
            distance,
        });
        true
    }

    fn psd(&self) -> Option<&NoiseSpectrum> {
        self.psd.as_ref()
    }

    fn end_time(&self) -> GpsTime {
        self.end
    }
}

/// Emits noise triggers for the templates of one shard
pub struct SyntheticFilter {
    templates: Vec<usize>,
    per_template: usize,
    rng: StdRng,
}

impl SyntheticFilter {
    pub fn new(shard: &TemplateShard, per_template: usize, seed: u64) -> Self {
        Self {
            templates: shard.indices().to_vec(),
            per_template,
            rng: StdRng::seed_from_u64(seed.wrapping_add(shard.rank as u64)),
        }
    }
}

#[async_trait]
impl FilterEngine for SyntheticFilter {
    async fn process_window(&mut self, ifo: &str, source: &dyn StreamingDataSource) -> DetectorResult {
        let count = self.templates.len() * self.per_template;
        let mut template_id = Vec::with_capacity(count);
        let mut end_time = Vec::with_capacity(count);
        let mut snr = Vec::with_capacity(count);
        let mut chisq = Vec::with_capacity(count);
        let mut chisq_dof = Vec::with_capacity(count);

        let end = source.end_time() as f64;
        for &template in &self.templates {
            for _ in 0..self.per_template {
                template_id.push(template as f64);
                end_time.push(end - self.rng.random::<f64>());
                // Exponential tail above a 4.0 threshold
                snr.push(4.0 - (1.0 - self.rng.random::<f64>()).ln());
                chisq.push(self.rng.random_range(10.0..60.0));
                chisq_dof.push(CHISQ_DOF);
            }
        }

        let arrays = [
            ("template_id", template_id),
            ("end_time", end_time),
            ("snr", snr),
            ("chisq", chisq),
            ("chisq_dof", chisq_dof),
        ]
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .collect();

        debug!(%ifo, triggers = count, "SyntheticFilter::process_window: called");
        match TriggerSet::new(arrays) {
            Ok(set) => DetectorResult::Batch(set),
            Err(_) => DetectorResult::Invalid,
        }
    }
}

/// Toy coincidence: ranks the loudest trigger of each detector
///
/// A foreground exists only when two or more detectors contribute.
#[derive(Debug, Default)]
pub struct LoudestCoincidence {
    cycles: u64,
}

impl BackgroundEstimator for LoudestCoincidence {
    fn add_singles(&mut self, combined: &CombinedResult, statuses: &StatusMap) -> CoincidenceResult {
        self.cycles += 1;
        let mut result = CoincidenceResult::new();

        let loudest: Vec<(usize, f64)> = combined
            .iter()
            .enumerate()
            .filter(|(_, (ifo, _))| statuses.get(*ifo).is_some_and(|s| s.is_valid()))
            .filter_map(|(i, (_, set))| {
                let max = set.get("snr")?.iter().copied().reduce(f64::max)?;
                Some((i, max))
            })
            .collect();

        debug!(cycle = self.cycles, contributing = loudest.len(), "LoudestCoincidence::add_singles: called");
        if loudest.len() < 2 {
            return result;
        }

        let stat = loudest.iter().map(|(_, snr)| snr * snr).sum::<f64>().sqrt();
        let ifar = 10f64.powf((stat - 10.0) / 2.0);
        result.insert("foreground/stat".to_string(), vec![stat]);
        result.insert(FOREGROUND_IFAR_KEY.to_string(), vec![ifar]);
        result.insert(
            "foreground/ifos".to_string(),
            loudest.iter().map(|(i, _)| *i as f64).collect(),
        );
        result
    }
}

/// Alert sink that only logs
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn upload(
        &mut self,
        artifact: &Path,
        psds: &BTreeMap<String, NoiseSpectrum>,
        low_frequency_cutoff: f64,
        testing: bool,
        annotations: &[String],
    ) -> Result<()> {
        info!(
            artifact = %artifact.display(),
            psds = psds.len(),
            low_frequency_cutoff,
            testing,
            ?annotations,
            "Upload candidate"
        );
        Ok(())
    }

    async fn save(&mut self, artifact: &Path) -> Result<()> {
        info!(artifact = %artifact.display(), "Archive candidate");
        Ok(())
    }
}

/// Builds synthetic collaborators from the simulation config
pub struct SimFactory {
    config: Arc<Config>,
}

impl SimFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl ProcessFactory for SimFactory {
    fn data_sources(&self, _rank: usize) -> Result<SourceMap> {
        let params = &self.config.simulation;
        let sources = self
            .config
            .detector_names()
            .into_iter()
            .enumerate()
            .map(|(i, ifo)| {
                let source = SyntheticSource::new(
                    &ifo,
                    self.config.analysis.start_time,
                    params.clone(),
                    params.seed.wrapping_add(i as u64),
                );
                (ifo, Box::new(source) as Box<dyn StreamingDataSource>)
            })
            .collect();
        Ok(sources)
    }

    fn filter_engine(&self, shard: &TemplateShard) -> Result<Box<dyn FilterEngine>> {
        let params = &self.config.simulation;
        Ok(Box::new(SyntheticFilter::new(shard, params.triggers_per_template, params.seed)))
    }

    fn background(&self) -> Option<Box<dyn BackgroundEstimator>> {
        Some(Box::new(LoudestCoincidence::default()))
    }

    fn alert_sink(&self) -> Option<Box<dyn AlertSink>> {
        Some(Box::new(LogSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectorStatus;

    fn params() -> SimulationConfig {
        SimulationConfig {
            dropout_probability: 0.0,
            psd_refresh_windows: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_source_requests_psd_first_and_periodically() {
        let mut source = SyntheticSource::new("H1", 1000, params(), 1);
        let timeout = Duration::from_millis(10);

        assert_eq!(source.advance(8, timeout).await, AdvanceStatus::NeedsPsdRecalculation);
        assert!(source.recalculate_psd().await);
        assert_eq!(source.end_time(), 1008);
        assert_eq!(source.advance(8, timeout).await, AdvanceStatus::Ready);
        assert_eq!(source.advance(8, timeout).await, AdvanceStatus::NeedsPsdRecalculation);
    }

    #[tokio::test]
    async fn test_source_distance_within_jitter() {
        let mut source = SyntheticSource::new("L1", 0, params(), 9);
        for _ in 0..20 {
            source.recalculate_psd().await;
            let distance = source.psd().unwrap().distance;
            assert!((130.0..=170.0).contains(&distance));
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_stream() {
        let noisy = SimulationConfig {
            dropout_probability: 0.5,
            ..Default::default()
        };
        let mut a = SyntheticSource::new("H1", 0, noisy.clone(), 3);
        let mut b = SyntheticSource::new("H1", 0, noisy, 3);
        let timeout = Duration::from_millis(10);
        for _ in 0..16 {
            assert_eq!(a.advance(4, timeout).await, b.advance(4, timeout).await);
        }
    }

    #[tokio::test]
    async fn test_filter_emits_shard_templates_only() {
        let shard = TemplateShard::for_rank(7, 3, 2).unwrap();
        let mut filter = SyntheticFilter::new(&shard, 2, 5);
        let source = SyntheticSource::new("H1", 1016, params(), 1);

        let DetectorResult::Batch(set) = filter.process_window("H1", &source).await else {
            panic!("expected a batch");
        };
        assert_eq!(set.len(), 6);
        assert_eq!(set.get("template_id").unwrap(), &[1.0, 1.0, 3.0, 3.0, 5.0, 5.0]);
        assert!(set.get("snr").unwrap().iter().all(|&s| s >= 4.0));
        assert!(set.get("end_time").unwrap().iter().all(|&t| t <= 1016.0 && t > 1015.0));
    }

    #[test]
    fn test_coincidence_needs_two_detectors() {
        let set = |snr: f64| TriggerSet::new([("snr".to_string(), vec![snr])].into_iter().collect()).unwrap();
        let valid = DetectorStatus::available(false, Some(100.0));
        let statuses: StatusMap = [("H1".to_string(), valid.clone()), ("L1".to_string(), valid)]
            .into_iter()
            .collect();

        let mut estimator = LoudestCoincidence::default();
        let single: CombinedResult = [("H1".to_string(), set(8.0))].into_iter().collect();
        assert!(estimator.add_singles(&single, &statuses).is_empty());

        let double: CombinedResult = [("H1".to_string(), set(6.0)), ("L1".to_string(), set(8.0))]
            .into_iter()
            .collect();
        let result = estimator.add_singles(&double, &statuses);
        assert_eq!(result["foreground/stat"], vec![10.0]);
        assert_eq!(result[FOREGROUND_IFAR_KEY], vec![1.0]);
        assert_eq!(result["foreground/ifos"], vec![0.0, 1.0]);
    }
}
