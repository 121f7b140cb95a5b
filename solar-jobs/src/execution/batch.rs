//! Bounded sub-batch execution with resumable progress
//!
//! A job's configuration describes either a date range or a small explicit
//! set of object ids. Ranges are cut into fixed windows and run in order,
//! committing progress after each one; a reclaimed job recomputes the windows
//! and skips those that end at or before its committed progress.

use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::job::{ExecutionContext, JobExecutor};
use crate::{JobRecord, JobsError, JobsResult};

/// Range or id-set portion of a job configuration
///
/// Other keys in the configuration are left for the batch handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Per-job override of the configured window size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ids: Option<Vec<i64>>,
}

impl RangeConfig {
    pub fn date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Self::default()
        }
    }

    pub fn object_ids(ids: Vec<i64>) -> Self {
        Self {
            object_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn with_batch_duration(mut self, duration: Duration) -> Self {
        self.batch_duration_secs = Some(duration.as_secs());
        self
    }

    pub fn from_value(configuration: &Value) -> JobsResult<Self> {
        serde_json::from_value(configuration.clone()).map_err(|e| JobsError::Validation(e.to_string()))
    }

    pub fn to_value(&self) -> JobsResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Validate the configuration and resolve it into a plan
    pub fn plan(&self, policy: &BatchPolicy) -> JobsResult<WorkPlan> {
        match (self.start_date, self.end_date, &self.object_ids) {
            (Some(start), Some(end), None) => {
                if start >= end {
                    return Err(JobsError::validation(format!(
                        "startDate {} must be before endDate {}",
                        start, end
                    )));
                }

                let requested = self.batch_duration_secs.map(Duration::from_secs);
                let window = policy
                    .window_for(requested)
                    .map(chrono::Duration::from_std)
                    .transpose()
                    .map_err(|e| JobsError::validation(format!("batchDurationSecs out of range: {}", e)))?;

                Ok(WorkPlan::Range { start, end, window })
            }
            (None, None, Some(ids)) => {
                if ids.is_empty() {
                    return Err(JobsError::validation("objectIds must not be empty"));
                }
                if ids.len() > policy.id_ceiling {
                    return Err(JobsError::validation(format!(
                        "{} objectIds exceeds the maximum of {} per job",
                        ids.len(),
                        policy.id_ceiling
                    )));
                }
                Ok(WorkPlan::Ids(ids.clone()))
            }
            (None, None, None) => Err(JobsError::validation(
                "either startDate/endDate or objectIds is required",
            )),
            (Some(_), None, None) | (None, Some(_), None) => {
                Err(JobsError::validation("startDate and endDate must both be set"))
            }
            _ => Err(JobsError::validation(
                "startDate/endDate and objectIds cannot be combined",
            )),
        }
    }
}

/// Batch sizing rules
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Default window size; `None` runs every range as one batch
    pub batch_duration: Option<Duration>,
    /// Smaller windows are not split
    pub min_batch_duration: Duration,
    /// Maximum ids in an id-set job
    pub id_ceiling: usize,
}

impl BatchPolicy {
    /// Effective window for a job, given its optional override
    pub fn window_for(&self, requested: Option<Duration>) -> Option<Duration> {
        requested
            .or(self.batch_duration)
            .filter(|d| *d >= self.min_batch_duration && !d.is_zero())
    }
}

impl From<&EngineConfig> for BatchPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            batch_duration: config.batch_duration,
            min_batch_duration: config.min_batch_duration,
            id_ceiling: config.id_batch_ceiling,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Half-open `[start, end)` sub-range of a date-range job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// One unit of work handed to a [`BatchHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Window(BatchWindow),
    Ids(Vec<i64>),
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Batch::Window(window) => write!(f, "window {}", window),
            Batch::Ids(ids) => write!(f, "{} ids", ids.len()),
        }
    }
}

/// A batch together with the job progress reached once it commits
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    pub batch: Batch,
    pub percent_after: f64,
}

/// Resolved work for one job
#[derive(Debug, Clone, PartialEq)]
pub enum WorkPlan {
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: Option<chrono::Duration>,
    },
    Ids(Vec<i64>),
}

impl WorkPlan {
    /// Every batch of the job, in execution order
    pub fn batches(&self) -> Vec<PlannedBatch> {
        self.remaining(0.0)
    }

    /// Batches not yet covered by `percent_complete`
    ///
    /// A window is skipped when the progress it commits is already reached.
    /// Window ends fall on whole milliseconds, so half a millisecond's share
    /// of the range absorbs rounding without swallowing even the shortest
    /// window.
    pub fn remaining(&self, percent_complete: f64) -> Vec<PlannedBatch> {
        let percent_complete = if percent_complete.is_finite() {
            percent_complete.clamp(0.0, 1.0)
        } else {
            0.0
        };

        match self {
            WorkPlan::Range { start, end, window } => {
                let total_ms = (*end - *start).num_milliseconds().max(1) as f64;
                let tolerance = 0.5 / total_ms;

                plan_windows(*start, *end, *window)
                    .into_iter()
                    .map(|w| PlannedBatch {
                        percent_after: if w.end >= *end {
                            1.0
                        } else {
                            (w.end - *start).num_milliseconds() as f64 / total_ms
                        },
                        batch: Batch::Window(w),
                    })
                    .filter(|planned| planned.percent_after > percent_complete + tolerance)
                    .collect()
            }
            WorkPlan::Ids(ids) => {
                if percent_complete >= 1.0 {
                    Vec::new()
                } else {
                    vec![PlannedBatch {
                        batch: Batch::Ids(ids.clone()),
                        percent_after: 1.0,
                    }]
                }
            }
        }
    }
}

/// Cut `[start, end)` into consecutive windows of `window`, the last one clipped
///
/// Without a positive window the whole range is a single batch.
pub fn plan_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window: Option<chrono::Duration>,
) -> Vec<BatchWindow> {
    if start >= end {
        return Vec::new();
    }

    let Some(step) = window.filter(|w| *w > chrono::Duration::zero()) else {
        return vec![BatchWindow { start, end }];
    };

    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = cursor.checked_add_signed(step).map_or(end, |n| n.min(end));
        windows.push(BatchWindow { start: cursor, end: next });
        cursor = next;
    }
    windows
}

/// Domain work for one batch, returning the number of results it produced
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn run_batch(&self, record: &JobRecord, batch: &Batch) -> anyhow::Result<u64>;
}

/// [`JobExecutor`] that runs a [`BatchHandler`] over the job's planned batches
pub struct BatchExecutor<H> {
    handler: H,
    policy: BatchPolicy,
}

impl<H: BatchHandler> BatchExecutor<H> {
    pub fn new(handler: H, policy: BatchPolicy) -> Self {
        Self { handler, policy }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }
}

#[async_trait]
impl<H: BatchHandler> JobExecutor for BatchExecutor<H> {
    fn validate(&self, configuration: &Value) -> JobsResult<()> {
        RangeConfig::from_value(configuration)?.plan(&self.policy).map(|_| ())
    }

    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<Option<String>> {
        let record = ctx.record();
        let plan = RangeConfig::from_value(&record.configuration)?.plan(&self.policy)?;

        let total = plan.batches().len();
        let pending = plan.remaining(record.percent_complete);
        if pending.len() < total {
            info!(
                job_id = %record.id,
                skipped = total - pending.len(),
                remaining = pending.len(),
                "Resuming from committed progress"
            );
        }

        let mut result_count = record.result_count;
        for planned in pending {
            ctx.check_cancelled()?;

            let count = self
                .handler
                .run_batch(record, &planned.batch)
                .await
                .with_context(|| format!("{} of job {} failed", planned.batch, record.id))?;

            result_count = result_count.saturating_add(i64::try_from(count).unwrap_or(i64::MAX));
            ctx.report_progress(planned.percent_after, result_count).await?;

            debug!(
                job_id = %record.id,
                batch = %planned.batch,
                count,
                percent = planned.percent_after,
                "Batch committed"
            );
        }

        Ok(Some(format!("Processed {} results", result_count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap()
    }

    fn days(n: i64) -> chrono::Duration {
        chrono::Duration::days(n)
    }

    #[test]
    fn test_windows_clip_last() {
        let windows = plan_windows(day(1), day(11), Some(days(3)));
        let ends: Vec<_> = windows.iter().map(|w| w.end).collect();
        assert_eq!(ends, vec![day(4), day(7), day(10), day(11)]);
        assert_eq!(windows[0].start, day(1));
    }

    #[test]
    fn test_small_or_absent_duration_is_one_batch() {
        let policy = BatchPolicy::default();
        assert_eq!(policy.window_for(Some(Duration::from_secs(60))), None);
        assert_eq!(policy.window_for(Some(Duration::from_secs(3600))), Some(Duration::from_secs(3600)));

        let unbatched = BatchPolicy {
            batch_duration: None,
            ..BatchPolicy::default()
        };
        let plan = RangeConfig::date_range(day(1), day(20)).plan(&unbatched).unwrap();
        assert_eq!(plan.batches().len(), 1);
    }

    #[test]
    fn test_default_policy_uses_weeks() {
        let plan = RangeConfig::date_range(day(1), day(22)).plan(&BatchPolicy::default()).unwrap();
        assert_eq!(plan.batches().len(), 3);
    }

    #[test]
    fn test_remaining_skips_committed_windows() {
        let config = RangeConfig::date_range(day(1), day(11)).with_batch_duration(Duration::from_secs(3 * 86_400));
        let plan = config.plan(&BatchPolicy::default()).unwrap();

        let remaining = plan.remaining(0.6);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].batch, Batch::Window(BatchWindow { start: day(7), end: day(10) }));
        assert!((remaining[0].percent_after - 0.9).abs() < 1e-9);
        assert_eq!(remaining[1].percent_after, 1.0);
        assert!(plan.remaining(1.0).is_empty());
    }

    #[test]
    fn test_validation_rules() {
        let policy = BatchPolicy::default();

        let reversed = RangeConfig::date_range(day(5), day(1));
        assert!(matches!(reversed.plan(&policy), Err(JobsError::Validation(_))));

        assert!(RangeConfig::default().plan(&policy).is_err());
        assert!(RangeConfig::object_ids(vec![]).plan(&policy).is_err());
        assert!(RangeConfig::object_ids((0..100).collect()).plan(&policy).is_ok());
        assert!(RangeConfig::object_ids((0..101).collect()).plan(&policy).is_err());

        let mut both = RangeConfig::date_range(day(1), day(2));
        both.object_ids = Some(vec![1]);
        assert!(both.plan(&policy).is_err());

        let half = RangeConfig {
            start_date: Some(day(1)),
            ..RangeConfig::default()
        };
        assert!(half.plan(&policy).is_err());
    }

    #[test]
    fn test_config_parses_camel_case() {
        let value = json!({
            "startDate": "2024-03-01T00:00:00Z",
            "endDate": "2024-03-02T00:00:00Z",
            "batchDurationSecs": 7200,
            "nodeIds": [1, 2]
        });
        let config = RangeConfig::from_value(&value).unwrap();
        assert_eq!(config.start_date, Some(day(1)));
        assert_eq!(config.batch_duration_secs, Some(7200));
        assert_eq!(config.plan(&BatchPolicy::default()).unwrap().batches().len(), 12);
    }

    #[test]
    fn test_sub_second_range_runs_once() {
        let start = day(1);
        let plan = RangeConfig::date_range(start, start + chrono::Duration::milliseconds(500))
            .plan(&BatchPolicy::default())
            .unwrap();

        let batches = plan.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].percent_after, 1.0);
        assert!(plan.remaining(1.0).is_empty());
    }

    #[test]
    fn test_short_tail_survives_resume() {
        let start = day(1);
        let end = start + days(14) + chrono::Duration::milliseconds(200);
        let plan = RangeConfig::date_range(start, end).plan(&BatchPolicy::default()).unwrap();

        let batches = plan.batches();
        assert_eq!(batches.len(), 3);

        let remaining = plan.remaining(batches[1].percent_after);
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining[0].batch,
            Batch::Window(BatchWindow { start: start + days(14), end })
        );
    }

    #[test]
    fn test_one_second_windows() {
        let start = day(1);
        let policy = BatchPolicy {
            batch_duration: Some(Duration::from_secs(1)),
            min_batch_duration: Duration::from_secs(1),
            ..BatchPolicy::default()
        };
        let plan = RangeConfig::date_range(start, start + chrono::Duration::seconds(10))
            .plan(&policy)
            .unwrap();

        let batches = plan.batches();
        assert_eq!(batches.len(), 10);

        let remaining = plan.remaining(batches[1].percent_after);
        assert_eq!(remaining.len(), 8);
        assert_eq!(
            remaining[0].batch,
            Batch::Window(BatchWindow {
                start: start + chrono::Duration::seconds(2),
                end: start + chrono::Duration::seconds(3),
            })
        );
    }

    proptest! {
        #[test]
        fn windows_tile_the_range(range_hours in 1i64..2000, step_hours in 1i64..400) {
            let start = day(1);
            let end = start + chrono::Duration::hours(range_hours);
            let step = chrono::Duration::hours(step_hours);
            let windows = plan_windows(start, end, Some(step));

            prop_assert_eq!(windows.first().map(|w| w.start), Some(start));
            prop_assert_eq!(windows.last().map(|w| w.end), Some(end));
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for w in &windows {
                prop_assert!(w.start < w.end);
                prop_assert!(w.end - w.start <= step);
            }
            let expected = (range_hours + step_hours - 1) / step_hours;
            prop_assert_eq!(windows.len() as i64, expected);
        }

        #[test]
        fn progress_is_increasing(range_hours in 2i64..2000, step_hours in 1i64..400) {
            let plan = WorkPlan::Range {
                start: day(1),
                end: day(1) + chrono::Duration::hours(range_hours),
                window: Some(chrono::Duration::hours(step_hours)),
            };
            let batches = plan.batches();
            for pair in batches.windows(2) {
                prop_assert!(pair[0].percent_after < pair[1].percent_after);
            }
            prop_assert_eq!(batches.last().map(|b| b.percent_after), Some(1.0));
        }
    }
}
