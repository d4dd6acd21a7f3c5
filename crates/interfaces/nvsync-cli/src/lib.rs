pub mod commands;
mod render;

use nvsync_pipeline::{RunReport, RunStatus};

/// Configuration, enumeration or connection failure; nothing was applied.
pub const EXIT_FATAL: u8 = 1;
/// Every item was attempted and at least one failed.
pub const EXIT_PARTIAL_FAILURE: u8 = 2;
pub const EXIT_CANCELLED: u8 = 130;

pub fn exit_code(report: &RunReport) -> u8 {
    match report.status {
        RunStatus::Success => 0,
        RunStatus::PartialFailure => EXIT_PARTIAL_FAILURE,
        RunStatus::Cancelled => EXIT_CANCELLED,
    }
}
