use nvsync_core::LogicalPath;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::sync::{ItemOutcome, PlannedAction, SyncEvent};

#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub path: LogicalPath,
    pub action: PlannedAction,
    pub bytes_done: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub total_items: u64,
    pub finished_items: u64,
    pub total_bytes: u64,
    pub done_bytes: u64,
    pub speed_bps: u64,
    pub failed_count: u64,
    pub in_flight: Vec<ActiveTransfer>,
}

/// Folds `SyncEvent`s into totals and a smoothed transfer rate for progress displays.
pub struct ProgressTracker {
    in_flight: HashMap<LogicalPath, ActiveTransfer>,
    finished_items: u64,
    failed_count: u64,
    done_bytes: u64,
    total_items: u64,
    total_bytes: u64,
    last_tick: Instant,
    bytes_since_last_tick: u64,
    speed_bps: u64,
    history: VecDeque<u64>,
    /// Totals grow with the events instead of being fixed up front.
    open_ended: bool,
}

impl ProgressTracker {
    /// For callers that only learn the amount of work from the events themselves.
    pub fn open_ended() -> Self {
        Self {
            open_ended: true,
            ..Self::with_totals(0, 0)
        }
    }

    fn with_totals(total_items: u64, total_bytes: u64) -> Self {
        Self {
            in_flight: HashMap::new(),
            finished_items: 0,
            failed_count: 0,
            done_bytes: 0,
            total_items,
            total_bytes,
            last_tick: Instant::now(),
            bytes_since_last_tick: 0,
            speed_bps: 0,
            history: VecDeque::new(),
            open_ended: false,
        }
    }

    pub fn update(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Started {
                path,
                action,
                total_bytes,
            } => {
                if self.open_ended {
                    self.total_items += 1;
                    self.total_bytes = self.total_bytes.saturating_add(*total_bytes);
                }
                self.in_flight.insert(
                    path.clone(),
                    ActiveTransfer {
                        path: path.clone(),
                        action: *action,
                        bytes_done: 0,
                        total_bytes: *total_bytes,
                    },
                );
            }
            SyncEvent::Progress { path, bytes_delta } => {
                self.bytes_since_last_tick += bytes_delta;
                self.done_bytes += bytes_delta;
                if let Some(entry) = self.in_flight.get_mut(path) {
                    entry.bytes_done += bytes_delta;
                }
            }
            SyncEvent::Finished { path, outcome, .. } => {
                // Dry-run items finish without ever starting.
                if self.in_flight.remove(path).is_none() && self.open_ended {
                    self.total_items += 1;
                }
                match outcome {
                    ItemOutcome::Failed(_) => self.failed_count += 1,
                    ItemOutcome::Cancelled => {}
                    ItemOutcome::Succeeded | ItemOutcome::WouldApply => self.finished_items += 1,
                }
            }
        }
    }

    pub fn snapshot(&mut self) -> TransferSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64();

        if elapsed >= 0.5 {
            let current_bps = (self.bytes_since_last_tick as f64 / elapsed) as u64;
            self.history.push_back(current_bps);
            if self.history.len() > 5 {
                self.history.pop_front();
            }
            self.speed_bps =
                (self.history.iter().sum::<u64>() as f64 / self.history.len() as f64) as u64;
            self.last_tick = now;
            self.bytes_since_last_tick = 0;
        }

        TransferSnapshot {
            total_items: self.total_items,
            finished_items: self.finished_items,
            total_bytes: self.total_bytes,
            done_bytes: self.done_bytes,
            speed_bps: self.speed_bps,
            failed_count: self.failed_count,
            in_flight: self.in_flight.values().cloned().collect(),
        }
    }
}
