//! Progress bar fed by the job's progress snapshots

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use massindex_core::ProgressSnapshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta})";

/// Create the job progress bar
pub fn create_job_progress(total: u64, hidden: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if hidden {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// One-line message for the bar, e.g. `Company 5/5 | Employee 1200/4500`
pub fn progress_message(snapshot: &ProgressSnapshot) -> String {
    snapshot
        .entities()
        .iter()
        .map(|e| format!("{} {}/{}", e.entity_type, e.items_read, e.total))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Keeps a progress bar in sync with a running job
pub struct ProgressDisplay {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl ProgressDisplay {
    pub fn spawn(mut updates: watch::Receiver<ProgressSnapshot>, hidden: bool) -> Self {
        let bar = create_job_progress(0, hidden);
        let task = {
            let bar = bar.clone();
            tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    apply(&bar, &snapshot);
                }
            })
        };
        Self { bar, task }
    }

    /// Stop following updates and leave the final state on screen
    pub fn finish(self, snapshot: &ProgressSnapshot) {
        self.task.abort();
        apply(&self.bar, snapshot);
        self.bar.finish();
    }

    /// Stop following updates, leaving the bar where it stopped
    pub fn abandon(self) {
        self.task.abort();
        self.bar.abandon();
    }
}

fn apply(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    // Rows inserted after planning can push the count past the planned total
    bar.set_length(snapshot.job_total_rows.max(snapshot.job_total_read));
    bar.set_position(snapshot.job_total_read);
    bar.set_message(progress_message(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use massindex_core::progress::PartitionProgress;

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            per_partition: vec![
                PartitionProgress {
                    partition_index: 0,
                    entity_type: "Company".to_string(),
                    items_read: 5,
                    total_for_entity: 5,
                },
                PartitionProgress {
                    partition_index: 1,
                    entity_type: "Employee".to_string(),
                    items_read: 1200,
                    total_for_entity: 4500,
                },
            ],
            job_total_read: 1205,
            job_total_rows: 4505,
        }
    }

    #[test]
    fn test_progress_message() {
        assert_eq!(progress_message(&snapshot()), "Company 5/5 | Employee 1200/4500");
    }

    #[test]
    fn test_bar_follows_snapshot() {
        let bar = create_job_progress(0, true);
        apply(&bar, &snapshot());
        assert_eq!(bar.length(), Some(4505));
        assert_eq!(bar.position(), 1205);
    }
}
