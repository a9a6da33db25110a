use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

/// Telemetry events sent from dataset jobs to the dispatcher for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A job started processing a dataset
    DatasetStarted,
    /// A batch was appended to the sink
    BatchWritten { rows: u64, duration_ms: u64 },
    /// A job finished, whatever its outcome
    DatasetFinished { success: bool },
}

pub type TelemetrySender = mpsc::UnboundedSender<TelemetryEvent>;

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub datasets_started: usize,
    pub datasets_completed: usize,
    pub datasets_failed: usize,
    pub rows_written: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::DatasetStarted => {
                self.datasets_started += 1;
            }
            TelemetryEvent::BatchWritten { rows, duration_ms } => {
                self.rows_written += rows;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::DatasetFinished { success } => {
                self.datasets_completed += 1;
                if !success {
                    self.datasets_failed += 1;
                }
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

/// Drain telemetry into progress bars until every sender is dropped.
///
/// Returns the final statistics so the caller can print a summary.
pub fn spawn_progress(
    total_datasets: u64,
    mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    show_bars: bool,
) -> tokio::task::JoinHandle<ProgressStats> {
    tokio::spawn(async move {
        let mut stats = ProgressStats::new();

        let bars = show_bars.then(|| {
            let multi_progress = MultiProgress::new();

            let dataset_bar = multi_progress.add(ProgressBar::new(total_datasets));
            dataset_bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "[{elapsed_precise}] Datasets: [{bar:30.cyan/blue}] {pos}/{len} ({percent}%)",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );

            let rows_bar = multi_progress.add(ProgressBar::new_spinner());
            rows_bar.set_style(
                ProgressStyle::default_spinner()
                    .template("[{elapsed_precise}] Rows:     {human_pos} | {per_sec}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );

            let stats_bar = multi_progress.add(ProgressBar::new(0));
            stats_bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] Batch Time: {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );

            (dataset_bar, rows_bar, stats_bar)
        });

        while let Some(event) = telemetry_rx.recv().await {
            stats.update(&event);

            if let Some((dataset_bar, rows_bar, stats_bar)) = &bars {
                let started = stats.datasets_started as u64;
                if dataset_bar.length().is_some_and(|len| len < started) {
                    dataset_bar.set_length(started);
                }
                dataset_bar.set_position(stats.datasets_completed as u64);
                rows_bar.set_position(stats.rows_written);

                let (p50, p90, p99) = stats.get_percentiles();
                if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                    stats_bar
                        .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                }
            }
        }

        if let Some((dataset_bar, rows_bar, stats_bar)) = bars {
            dataset_bar.finish_with_message("All datasets processed");
            rows_bar.finish();
            stats_bar.finish();
        }

        stats
    })
}
