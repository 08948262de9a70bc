use crate::types::ConfigKey;

/// Observer for reporting incremental progress while an experiment runs.
///
/// Configuration notifications arrive from worker threads, so implementations
/// must be shareable across them.
pub trait ExperimentProgress: Sync {
    fn on_experiment_start(&self, total_configurations: usize) {
        let _ = total_configurations;
    }
    fn on_load_start(&self, ensemble_size: usize) {
        let _ = ensemble_size;
    }
    fn on_load_finish(&self, ensemble_size: usize, num_samples: Option<usize>) {
        let _ = (ensemble_size, num_samples);
    }
    fn on_configuration_done(&self, key: &ConfigKey, succeeded: bool) {
        let _ = (key, succeeded);
    }
    fn on_experiment_finish(&self) {}
}

#[derive(Default)]
pub struct NoopProgress;

impl ExperimentProgress for NoopProgress {}
