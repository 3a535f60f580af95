use super::{days_before, Pipeline, RunSummary, RunVariant};
use crate::error::{Result, TrendError};
use crate::labeler::check_lookback_days;
use crate::model::LabelDistribution;
use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, Instrument};

impl Pipeline {
    /// Daily state machine for the day containing `now`.
    pub async fn run_daily(&mut self, now: DateTime<Utc>) -> Result<RunSummary> {
        let mut summary = RunSummary::new(RunVariant::Daily, now.date_naive());
        summary.days_total = 1;
        let span = info_span!("run", run_id = %summary.run_id, variant = "daily");

        let result = self.daily_steps(now, &mut summary).instrument(span).await;
        if let Err(e) = &result {
            error!(run_id = %summary.run_id, error = %e, "Daily run aborted");
        }
        result.map(|()| {
            summary.log();
            summary
        })
    }

    async fn daily_steps(&mut self, now: DateTime<Utc>, summary: &mut RunSummary) -> Result<()> {
        let today = now.date_naive();
        let lookback = check_lookback_days(self.options.lookback_days)?;
        let label_date = days_before(today, lookback)?;
        info!(date = %today, "Starting daily run");

        let repo_names = self
            .sources
            .trending
            .get_current()
            .await
            .map_err(|e| TrendError::Aborted(format!("trending snapshot unavailable: {}", e)))?;
        if repo_names.is_empty() {
            return Err(TrendError::Aborted("trending snapshot is empty".into()));
        }
        info!(repos = repo_names.len(), "Fetched today's trending repositories");

        self.history.record(today, &repo_names);

        let outcome = self
            .merger
            .enrich_batch(&repo_names, now, &self.options.batch)
            .await;
        summary.enrichment_failures = outcome.failed;
        if outcome.records.is_empty() {
            return Err(TrendError::Aborted("no repository could be enriched".into()));
        }
        let records = outcome.records;
        summary.repos_collected = records.len();

        summary.unlabeled_published = self.sink.upsert(&records)?;
        info!(records = summary.unlabeled_published, sink = self.sink.name(), "Published unlabeled features");

        self.staging.save(today, &records)?;
        summary.days_processed = 1;

        // Today's snapshot is recorded above, so the window for `label_date` is complete
        let Some(staged) = self.staging.load(label_date)? else {
            info!(label_date = %label_date, lookback_days = lookback, "No staging copy to label yet");
            return Ok(());
        };

        let labeled = self.labeler.label(&self.history, staged);
        summary.labeled_published = self.sink.upsert(&labeled)?;
        summary.labeled_date = Some(label_date);
        summary.labels = LabelDistribution::from_records(&labeled);
        info!(label_date = %label_date, records = summary.labeled_published, "Published labeled features");

        self.staging.remove(label_date)?;
        Ok(())
    }
}
