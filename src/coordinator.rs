use std::sync::mpsc;
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::{ArchiveClient, PageRequest};
use crate::dedupe::DedupeTracker;
use crate::domain::{ImageDescriptor, PublishDate};
use crate::download::{DownloadOutcome, DownloadWorker, ImageSource};
use crate::error::WallpaperError;
use crate::watermark::{CommitOutcome, WatermarkStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub start_offset: usize,
    pub requested_total: usize,
    pub page_cap: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub completed: usize,
    pub already_present: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pages: usize,
    pub success: bool,
    pub most_recent: Option<PublishDate>,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub commit: Result<CommitOutcome, WallpaperError>,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub date: PublishDate,
    pub result: Result<DownloadOutcome, WallpaperError>,
}

pub struct BatchCoordinator<A: ArchiveClient, S: ImageSource> {
    archive: A,
    worker: DownloadWorker<S>,
    store: Option<WatermarkStore>,
    plan: FetchPlan,
}

impl<A: ArchiveClient, S: ImageSource> BatchCoordinator<A, S> {
    pub fn new(
        archive: A,
        worker: DownloadWorker<S>,
        store: Option<WatermarkStore>,
        plan: FetchPlan,
    ) -> Self {
        Self {
            archive,
            worker,
            store,
            plan,
        }
    }

    // Without a store (count mode) nothing is skipped by date and nothing is recorded.
    pub fn run(mut self) -> Result<RunReport, WallpaperError> {
        self.worker.ensure_output_dir()?;
        let session = match self.store.as_mut() {
            Some(store) => Some(store.begin_run()?),
            None => None,
        };
        let floor = session
            .as_ref()
            .and_then(|session| session.baseline())
            .map(|watermark| watermark.as_publish_date());
        let mut tracker = DedupeTracker::new(floor);

        let outcome = drive(&self.archive, &self.worker, self.plan, &mut tracker);

        let commit = match session {
            Some(session) => session.commit(outcome.success, outcome.most_recent),
            None => Ok(CommitOutcome::Untracked),
        };
        if let Err(err) = &commit {
            error!(error = %err, "failed to record watermark");
        }
        info!(
            completed = outcome.completed,
            already_present = outcome.already_present,
            skipped = outcome.skipped,
            failed = outcome.failed,
            success = outcome.success,
            "run finished"
        );
        Ok(RunReport { outcome, commit })
    }
}

fn drive<A: ArchiveClient, S: ImageSource>(
    archive: &A,
    worker: &DownloadWorker<S>,
    plan: FetchPlan,
    tracker: &mut DedupeTracker,
) -> RunOutcome {
    let mut outcome = RunOutcome {
        success: true,
        ..RunOutcome::default()
    };
    let mut handled = 0usize;

    loop {
        let remaining = plan.requested_total.saturating_sub(handled);
        if remaining == 0 {
            break;
        }
        let request = PageRequest {
            offset: plan.start_offset + handled,
            count: remaining.min(plan.page_cap.max(1)),
        };

        info!(offset = request.offset, count = request.count, "fetching archive page");
        let mut page = match archive.fetch_page(request.offset, request.count) {
            Ok(page) => page,
            Err(err) => {
                error!(offset = request.offset, error = %err, "archive request failed");
                outcome.success = false;
                break;
            }
        };
        outcome.pages += 1;
        if page.is_empty() {
            warn!(offset = request.offset, "archive returned no images, stopping");
            break;
        }

        page.sort_newest_first();
        handled += page.len();

        let mut pending = Vec::with_capacity(page.len());
        for image in page {
            if tracker.should_skip(image.publish_date) {
                info!(date = %image.publish_date, "already processed");
                outcome.skipped += 1;
            } else {
                pending.push(image);
            }
        }

        let mut page_failed = false;
        let mut page_latest: Option<PublishDate> = None;
        for report in download_page(worker, &pending) {
            match report.result {
                Ok(DownloadOutcome::Written { .. }) => outcome.completed += 1,
                Ok(DownloadOutcome::AlreadyPresent { .. }) => outcome.already_present += 1,
                Err(err) => {
                    warn!(date = %report.date, error = %err, "download failed");
                    outcome.failed += 1;
                    page_failed = true;
                    continue;
                }
            }
            page_latest = page_latest.max(Some(report.date));
        }

        if page_failed {
            outcome.success = false;
            break;
        }
        outcome.most_recent = outcome.most_recent.max(page_latest);
    }

    outcome
}

// A failed download never cancels its siblings; every result is collected.
pub fn download_page<S: ImageSource>(
    worker: &DownloadWorker<S>,
    images: &[ImageDescriptor],
) -> Vec<DownloadReport> {
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for image in images {
            let tx = tx.clone();
            scope.spawn(move || {
                let result = worker.download(image);
                tx.send(DownloadReport {
                    date: image.publish_date,
                    result,
                })
                .ok();
            });
        }
    });
    drop(tx);
    rx.into_iter().collect()
}
