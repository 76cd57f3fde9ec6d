//! Notification dispatcher: batched completion notices per reply channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use sluice_events::Event;
use sluice_tasks::{Task, TaskStatus};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;

/// Counters for one dispatcher tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifySummary {
    /// Batched completion messages delivered.
    pub batches_sent: usize,
    /// Tasks marked notified.
    pub tasks_notified: usize,
    /// Failure notices delivered.
    pub failure_notices: usize,
}

/// One dispatcher tick: batch, deliver, mark.
///
/// Delivery failures are logged and retried on the next tick; they are never
/// dead-lettered. Marking is per task and idempotent, so a crash between
/// delivery and marking costs at most one duplicate message.
pub async fn tick(ctx: &Arc<PipelineContext>) -> NotifySummary {
    let mut summary = NotifySummary::default();

    let waiting = match ctx.store.completed_unnotified().await {
        Ok(waiting) => waiting,
        Err(err) => {
            warn!(error = %err, "failed to load completed tasks for notification");
            return summary;
        }
    };

    let mut by_channel: BTreeMap<i64, Vec<Task>> = BTreeMap::new();
    for task in waiting {
        by_channel.entry(task.channel_id).or_default().push(task);
    }

    let mut first = true;
    for (channel_id, tasks) in by_channel {
        if !first {
            // Outbound spacing between distinct channels respects the
            // uplink's rate limit.
            sleep(ctx.notify.channel_spacing()).await;
        }
        first = false;

        let batch: Vec<&Task> = tasks.iter().take(ctx.notify.batch_limit).collect();
        let text = compose_completion(&batch, tasks.len());

        match ctx.uplink.send_message(channel_id, &text).await {
            Ok(()) => {
                for task in &batch {
                    match ctx.store.mark_notified(task.id).await {
                        Ok(()) => summary.tasks_notified += 1,
                        Err(err) => {
                            warn!(task_id = %task.id, error = %err, "mark_notified failed");
                        }
                    }
                }
                summary.batches_sent += 1;
                ctx.metrics.inc_notification();
                ctx.publish(Event::NotificationSent {
                    channel_id,
                    tasks: batch.len(),
                });
                info!(channel_id, tasks = batch.len(), "completion notice delivered");
            }
            Err(err) => {
                warn!(
                    channel_id,
                    error = %err,
                    "completion notice delivery failed; will retry next tick"
                );
            }
        }
    }

    if ctx.notify.announce_failures {
        summary.failure_notices = announce_failures(ctx).await;
    }

    summary
}

/// Compact failure notices: original filename plus a category-derived
/// one-liner, never the raw error string.
async fn announce_failures(ctx: &Arc<PipelineContext>) -> usize {
    let failed = match ctx.store.by_status(TaskStatus::Failed).await {
        Ok(failed) => failed,
        Err(err) => {
            warn!(error = %err, "failed to load failed tasks for notices");
            return 0;
        }
    };

    let mut sent = 0_usize;
    for task in failed.into_iter().filter(|task| !task.notified) {
        let Some(fault) = task.fault.as_ref() else {
            // A failed task without a fault is a store anomaly; mark it so
            // it stops reappearing, but say nothing.
            debug!(task_id = %task.id, "failed task carries no fault; muting");
            let _ = ctx.store.mark_notified(task.id).await;
            continue;
        };
        if !fault.category.submitter_visible() {
            let _ = ctx.store.mark_notified(task.id).await;
            continue;
        }

        let text = format!("{}: {}", task.file_name, fault.submitter_reason());
        match ctx.uplink.send_message(task.channel_id, &text).await {
            Ok(()) => {
                if let Err(err) = ctx.store.mark_notified(task.id).await {
                    warn!(task_id = %task.id, error = %err, "mark_notified failed");
                }
                sent += 1;
                sleep(ctx.notify.channel_spacing()).await;
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "failure notice delivery failed");
            }
        }
    }
    sent
}

fn compose_completion(batch: &[&Task], total: usize) -> String {
    let mut lines = Vec::with_capacity(batch.len() + 1);
    lines.push(format!("{total} file(s) processed:"));
    for task in batch {
        lines.push(format!("• {}", task.file_name));
    }
    if total > batch.len() {
        lines.push(format!("… and {} more", total - batch.len()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_tasks::TypeClass;

    fn task(name: &str) -> Task {
        Task::new(1, 1, name, 10, TypeClass::Text, "h")
    }

    #[test]
    fn completion_message_lists_batch_and_overflow() {
        let tasks = [task("a.txt"), task("b.txt"), task("c.txt")];
        let batch: Vec<&Task> = tasks.iter().take(2).collect();
        let text = compose_completion(&batch, 3);

        assert!(text.starts_with("3 file(s) processed:"));
        assert!(text.contains("• a.txt"));
        assert!(text.contains("• b.txt"));
        assert!(!text.contains("c.txt"));
        assert!(text.contains("… and 1 more"));
    }

    #[test]
    fn completion_message_without_overflow_is_flat() {
        let tasks = [task("only.txt")];
        let batch: Vec<&Task> = tasks.iter().collect();
        let text = compose_completion(&batch, 1);
        assert!(!text.contains("more"));
    }
}
