use super::{days_before, end_of_day, Pipeline, RunSummary, RunVariant, MAX_BACKFILL_DAYS};
use crate::error::{Result, TrendError};
use crate::labeler::check_lookback_days;
use crate::model::{FeatureRecord, LabelDistribution};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, info_span, warn, Instrument};

impl Pipeline {
    /// Backfills `days + 1` historical days ending `lookback_days` before `now`.
    ///
    /// Each day's trending list is the archive's top `top_n` repositories by
    /// star velocity. Days are processed in chronological order; everything is
    /// labeled and published once at the end.
    pub async fn run_backfill(&mut self, now: DateTime<Utc>, days: u32, top_n: usize) -> Result<RunSummary> {
        if days > MAX_BACKFILL_DAYS {
            return Err(TrendError::Config(format!(
                "backfill range of {} days exceeds {}",
                days, MAX_BACKFILL_DAYS
            )));
        }
        let lookback = check_lookback_days(self.options.lookback_days)?;
        let end = days_before(now.date_naive(), lookback)?;
        let mut summary = RunSummary::new(RunVariant::Backfill, end);
        summary.days_total = days as usize + 1;
        let span = info_span!("run", run_id = %summary.run_id, variant = "backfill");

        let result = self
            .backfill_steps(days, top_n, &mut summary)
            .instrument(span)
            .await;
        if let Err(e) = &result {
            error!(run_id = %summary.run_id, error = %e, "Backfill aborted");
        }
        result.map(|()| {
            summary.log();
            summary
        })
    }

    async fn backfill_steps(
        &mut self,
        days: u32,
        top_n: usize,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let end = summary.reference_date;
        let start = days_before(end, days)?;
        info!(start = %start, end = %end, top_n, "Starting backfill");

        let mut collected: Vec<FeatureRecord> = Vec::new();
        for offset in 0..=days {
            let day = start + Duration::days(offset as i64);
            let anchor = end_of_day(day);
            info!(date = %day, progress = %format!("{}/{}", offset + 1, days + 1), "Processing day");

            let rates = self
                .merger
                .aggregator()
                .rates_for_date(anchor, &self.options.sampled_hours)
                .await;
            if rates.is_empty() {
                warn!(date = %day, "No archive data for day, skipping");
                summary.days_failed += 1;
                continue;
            }

            let repo_names = rates.top_by_star_velocity(top_n);
            info!(date = %day, repos = repo_names.len(), "Top repositories by star velocity");
            self.history.record(day, &repo_names);
            summary.repos_collected += repo_names.len();

            let outcome = self
                .merger
                .enrich_batch_with_rates(&repo_names, anchor, &self.options.batch, rates)
                .await;
            summary.enrichment_failures += outcome.failed;
            if outcome.records.is_empty() {
                warn!(date = %day, "No features collected for day");
            }
            collected.extend(outcome.records);
            summary.days_processed += 1;

            if offset < days && !self.options.day_pause.is_zero() {
                tokio::time::sleep(self.options.day_pause).await;
            }
        }

        if collected.is_empty() {
            return Err(TrendError::Aborted("no features collected during backfill".into()));
        }
        info!(records = collected.len(), "Labeling backfilled features");

        let labeled = self.labeler.label(&self.history, collected);
        summary.labels = LabelDistribution::from_records(&labeled);
        summary.labeled_published = self.sink.upsert(&labeled)?;
        info!(
            records = summary.labeled_published,
            sink = self.sink.name(),
            "Published labeled backfill"
        );
        Ok(())
    }
}
