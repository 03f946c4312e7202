/// Batch orchestrator: runs the ground-open-type-save-close pipeline once
/// per content item, strictly sequentially.
///
/// A terminal grounding failure skips the item; too many of those in a row
/// abort the whole batch, since a desktop where the icon cannot be found
/// will not get better on its own. Cancellation is checked between items
/// only, never in the middle of a grounding attempt.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::AutomationConfig;
use crate::content::Post;
use crate::errors::PinpointError;
use crate::executor::{input, notepad};
use crate::grounding::engine::GroundingEngine;
use crate::perception::screenshot::ScreenCapturer;

/// Deliberately fuzzy natural language; disambiguation is the grounding
/// model's job, just as it would be a human's.
pub const NOTEPAD_ICON_DESC: &str = "A single Notepad application desktop shortcut icon, \
a text editor icon with a small notepad or document symbol and the label 'Notepad'. \
If there are multiple Notepad icons, point to exactly one of them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Saved,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: u64,
    pub status: ItemStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn summarize(reports: &[ItemReport]) -> BatchSummary {
    let mut summary = BatchSummary {
        saved: 0,
        skipped: 0,
        failed: 0,
    };
    for report in reports {
        match report.status {
            ItemStatus::Saved => summary.saved += 1,
            ItemStatus::Skipped => summary.skipped += 1,
            ItemStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

pub fn log_summary(reports: &[ItemReport]) -> BatchSummary {
    let summary = summarize(reports);
    tracing::info!(
        total = reports.len(),
        saved = summary.saved,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished"
    );
    for report in reports {
        match &report.reason {
            Some(reason) => {
                tracing::info!(id = report.id, status = ?report.status, reason = %reason, "item")
            }
            None => tracing::info!(id = report.id, status = ?report.status, "item"),
        }
    }
    summary
}

pub struct BatchRunner {
    engine: GroundingEngine,
    capturer: Arc<dyn ScreenCapturer>,
    automation: AutomationConfig,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(
        engine: GroundingEngine,
        capturer: Arc<dyn ScreenCapturer>,
        automation: AutomationConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            capturer,
            automation,
            stop,
        }
    }

    pub async fn run(&self, posts: &[Post]) -> Vec<ItemReport> {
        let target_dir = self.automation.resolve_target_dir();
        if let Err(e) = tokio::fs::create_dir_all(&target_dir).await {
            tracing::error!(dir = %target_dir.display(), error = %e, "cannot create target directory");
            return posts
                .iter()
                .map(|p| ItemReport {
                    id: p.id,
                    status: ItemStatus::Failed,
                    reason: Some(format!("target directory: {e}")),
                })
                .collect();
        }
        tracing::info!(dir = %target_dir.display(), "target directory ready");

        let mut reports: Vec<ItemReport> = Vec::with_capacity(posts.len());
        let mut consecutive_grounding_failures: u32 = 0;

        for (idx, post) in posts.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                tracing::warn!(remaining = posts.len() - idx, "batch cancelled");
                reports.extend(skip_rest(&posts[idx..], "cancelled"));
                break;
            }

            tracing::info!(item = idx + 1, total = posts.len(), id = post.id, "processing item");

            match self.run_item(post, &target_dir).await {
                Ok(()) => {
                    consecutive_grounding_failures = 0;
                    reports.push(ItemReport {
                        id: post.id,
                        status: ItemStatus::Saved,
                        reason: None,
                    });
                }
                Err(e @ PinpointError::Grounding { .. }) => {
                    consecutive_grounding_failures += 1;
                    tracing::error!(id = post.id, error = %e, "grounding exhausted, skipping item");
                    reports.push(ItemReport {
                        id: post.id,
                        status: ItemStatus::Skipped,
                        reason: Some(e.to_string()),
                    });
                    if consecutive_grounding_failures >= self.automation.max_consecutive_failures {
                        tracing::error!(
                            failures = consecutive_grounding_failures,
                            "too many grounding failures in a row, aborting batch"
                        );
                        reports.extend(skip_rest(
                            &posts[idx + 1..],
                            "batch aborted after repeated grounding failures",
                        ));
                        break;
                    }
                }
                Err(e) => {
                    consecutive_grounding_failures = 0;
                    tracing::error!(id = post.id, error = %e, "item failed");
                    reports.push(ItemReport {
                        id: post.id,
                        status: ItemStatus::Failed,
                        reason: Some(e.to_string()),
                    });
                }
            }
        }

        reports
    }

    async fn run_item(&self, post: &Post, target_dir: &std::path::Path) -> Result<(), PinpointError> {
        let settle = Duration::from_millis(self.automation.settle_delay_ms);

        // The icon has to be visible before anyone can ground it.
        input::show_desktop().await?;
        tokio::time::sleep(settle).await;

        let tag = format!("post_{}", post.id);
        let grounded = self.engine.locate_tagged(NOTEPAD_ICON_DESC, &tag).await?;

        notepad::open_via_icon(
            &self.capturer,
            grounded.point,
            Duration::from_secs(self.automation.window_timeout_secs),
        )
        .await?;
        tokio::time::sleep(settle).await;

        notepad::type_document(&post.document_text()).await?;
        tokio::time::sleep(settle).await;

        notepad::save_document_as(&target_dir.join(post.filename())).await?;
        notepad::close_window().await?;
        Ok(())
    }
}

fn skip_rest<'a>(posts: &'a [Post], reason: &str) -> impl Iterator<Item = ItemReport> + 'a {
    let reason = reason.to_string();
    posts.iter().map(move |p| ItemReport {
        id: p.id,
        status: ItemStatus::Skipped,
        reason: Some(reason.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: u64, status: ItemStatus) -> ItemReport {
        ItemReport {
            id,
            status,
            reason: None,
        }
    }

    #[test]
    fn summary_counts_by_status() {
        let reports = vec![
            report(1, ItemStatus::Saved),
            report(2, ItemStatus::Saved),
            report(3, ItemStatus::Skipped),
            report(4, ItemStatus::Failed),
        ];
        let summary = summarize(&reports);
        assert_eq!(
            summary,
            BatchSummary {
                saved: 2,
                skipped: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn skip_rest_labels_every_remaining_item() {
        let posts = crate::content::fallback_posts(3);
        let reports: Vec<ItemReport> = skip_rest(&posts, "cancelled").collect();
        assert_eq!(reports.len(), 3);
        assert!(reports
            .iter()
            .all(|r| r.status == ItemStatus::Skipped
                && r.reason.as_deref() == Some("cancelled")));
    }
}
