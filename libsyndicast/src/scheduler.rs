//! Timezone-aware sweep scheduler
//!
//! Posts store a calendar date and a local wall-clock time with no zone
//! attached; the zone lives on the channel credential. Each sweep selects
//! candidates by UTC calendar date, then filters them by whether the
//! current wall clock in the credential's zone is within the tolerance
//! window of the scheduled time. Because candidate selection is by UTC
//! date, a post can be considered on consecutive sweeps across a local
//! midnight without being selected twice: dispatch conclusions remove it
//! from the pending set.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::db::Database;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::platforms::AdapterRegistry;

const SECONDS_PER_DAY: i64 = 86_400;

/// Whether the wall clock in `tz` at `now_utc` is within `tolerance_secs`
/// of `scheduled_time`, treating the clock as circular so times on either
/// side of midnight compare by their short distance.
pub fn local_window_contains(
    scheduled_time: NaiveTime,
    tz: Tz,
    now_utc: DateTime<Utc>,
    tolerance_secs: i64,
) -> bool {
    let local_time = now_utc.with_timezone(&tz).time();

    let scheduled_secs = scheduled_time.num_seconds_from_midnight() as i64;
    let local_secs = local_time.num_seconds_from_midnight() as i64;

    let raw = (local_secs - scheduled_secs).abs();
    let delta = raw.min(SECONDS_PER_DAY - raw);

    delta <= tolerance_secs
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Pending posts on today's UTC date, across all configured platforms.
    pub candidates_found: usize,
    /// Candidates whose local wall clock was inside the window.
    pub due: usize,
    pub dispatched_ok: usize,
    pub dispatch_failed: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    adapters: AdapterRegistry,
    dispatcher: Dispatcher,
    tolerance_secs: i64,
}

impl Scheduler {
    pub fn new(
        db: Database,
        adapters: AdapterRegistry,
        dispatcher: Dispatcher,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            db,
            adapters,
            dispatcher,
            tolerance_secs,
        }
    }

    /// Run one sweep at the given instant.
    ///
    /// Per-post failures never abort the sweep; they are counted and the
    /// sweep moves on. `Err` is reserved for candidate-selection faults.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let date = now.date_naive();
        let mut summary = SweepSummary::default();

        for platform in self.adapters.platforms() {
            let candidates = self.db.pending_posts_for_date(platform, date).await?;
            summary.candidates_found += candidates.len();

            for post in candidates {
                let credential = match self
                    .db
                    .active_credential(&post.user_id, post.platform)
                    .await
                {
                    Ok(Some(credential)) => credential,
                    Ok(None) => {
                        // Left pending: the user may reconnect before the
                        // window passes.
                        tracing::warn!(
                            post_id = %post.id,
                            platform = %post.platform,
                            "Skipping post without an activated credential"
                        );
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(post_id = %post.id, error = %e, "Credential lookup failed");
                        continue;
                    }
                };

                let tz: Tz = match credential.timezone.parse() {
                    Ok(tz) => tz,
                    Err(_) => {
                        tracing::warn!(
                            post_id = %post.id,
                            timezone = %credential.timezone,
                            "Skipping post with unresolvable timezone"
                        );
                        continue;
                    }
                };

                if !local_window_contains(post.scheduled_time, tz, now, self.tolerance_secs) {
                    continue;
                }
                summary.due += 1;

                match self.dispatcher.dispatch(&post.id).await {
                    Ok(DispatchOutcome::Failed { .. }) => summary.dispatch_failed += 1,
                    Ok(_) => summary.dispatched_ok += 1,
                    Err(e) => {
                        tracing::error!(post_id = %post.id, error = %e, "Dispatch error");
                        summary.dispatch_failed += 1;
                    }
                }
            }
        }

        tracing::debug!(
            candidates = summary.candidates_found,
            due = summary.due,
            ok = summary.dispatched_ok,
            failed = summary.dispatch_failed,
            "Sweep complete"
        );
        Ok(summary)
    }
}
