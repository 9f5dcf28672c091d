use crate::error::CliError;
use engine_core::progress::ProgressStatus;
use model::execution::operation::SyncOperation;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_operation(operation: &SyncOperation) {
    let p = &operation.progress;
    println!("Operation '{}':", operation.operation_id);
    println!("-----------------------------");
    println!("{:<20} {}", "Status", operation.status);
    println!(
        "{:<20} {} .. {}",
        "Date range", operation.date_range.start, operation.date_range.end
    );
    println!("{:<20} {}", "Schools", operation.schools.len());
    println!(
        "{:<20} {}/{} ({} resumed, {} failed)",
        "Chunks", p.chunks_completed, p.total_chunks, p.chunks_resumed, p.chunks_failed
    );
    println!("{:<20} {}", "Records processed", p.records_processed);
    println!("{:<20} {}", "Records succeeded", p.records_succeeded);
    println!("{:<20} {}", "Records failed", p.records_failed);
    println!("{:<20} {}", "Skipped duplicates", p.skipped_duplicates);

    if !operation.errors.is_empty() {
        println!("{:<20} {}", "Errors", operation.total_errors());
        for entry in operation.recent_errors(10) {
            let chunk = entry.chunk_id.as_ref().map(|c| c.as_str()).unwrap_or("-");
            println!("  [{}] {}: {}", entry.timestamp.to_rfc3339(), chunk, entry.message);
        }
    }
}

pub fn print_progress_table(status: &ProgressStatus) {
    println!("Progress for operation '{}':", status.operation_id);
    println!("-----------------------------");
    println!("{:<16} {}", "Stage", status.stage);
    println!("{:<16} {:.1}%", "Percent", status.percent);
    println!(
        "{:<16} {}/{}",
        "Checkpointed", status.checkpointed_chunks, status.total_chunks
    );
    println!("{:<16} {}", "Rows written", status.records_written);
    println!("{:<16} {}", "Errors", status.error_count);
    let last = status
        .last_checkpoint_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<16} {}", "Last checkpoint", last);
}

pub fn print_history(operations: &[SyncOperation]) {
    if operations.is_empty() {
        println!("No sync operations recorded");
        return;
    }
    println!(
        "{:<44} {:<12} {:<24} {:>8} {:>10}",
        "OPERATION", "STATUS", "DATES", "CHUNKS", "RECORDS"
    );
    for op in operations {
        println!(
            "{:<44} {:<12} {:<24} {:>8} {:>10}",
            op.operation_id.as_str(),
            op.status.as_str(),
            format!("{}..{}", op.date_range.start, op.date_range.end),
            format!("{}/{}", op.progress.chunks_completed, op.progress.total_chunks),
            op.progress.records_succeeded,
        );
    }
}
