// crates/vindelta-core/src/pipeline.rs

use chrono::Local;
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::carryover::{self, CarryoverOutcome};
use crate::classifier;
use crate::composer;
use crate::config::Settings;
use crate::consent_rule;
use crate::date_merger;
use crate::delta_queue::DeltaQueue;
use crate::error::Result;
use crate::feed;
use crate::manifest::{self, ManifestPartitions};
use crate::normalizer;
use crate::sources::{ConfirmationSource, ContactSource};
use crate::types::{empty_record_frame, vin_list, RuleConfig};

/// Everything a run needs to talk to the outside world. The stores are trait
/// objects so the whole pipeline runs against in-memory doubles in tests.
pub struct PipelineContext<'a> {
    pub queue: &'a dyn DeltaQueue,
    pub confirmations: &'a dyn ConfirmationSource,
    pub contacts: &'a dyn ContactSource,
    pub rules: RuleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    Feed,
    DeltaOnly,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunCounts {
    pub feed_rows: usize,
    pub unconfirmed: usize,
    pub confirmed: usize,
    pub carried: usize,
    pub resend: usize,
    pub public_service: usize,
    pub consent_rule_applied: usize,
    pub outbound_rows: usize,
    pub manifest_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All phases ran; failures abort with an error instead of a report.
    Completed,
}

/// Serializable receipt for one run, printed by the binary as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub entry_point: EntryPoint,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// The in-memory outputs of a run, before anything touches the filesystem.
pub struct RunArtifacts {
    pub outbound: DataFrame,
    pub manifest: DataFrame,
    /// Present only on feed runs: the normalized ingested set, snapshotted
    /// before corrections are applied.
    pub backup: Option<DataFrame>,
}

/// Full feed run: normalize, classify against the confirmation source, queue
/// the unconfirmed rows, drain the queue, overlay authoritative dates, apply
/// the consent rule, and build the manifest.
pub async fn execute_feed_run(
    ctx: &PipelineContext<'_>,
    feed: DataFrame,
) -> Result<(RunArtifacts, RunReport)> {
    let run_id = Uuid::new_v4();
    info!(%run_id, rows = feed.height(), "Starting feed run");

    let normalized = normalizer::normalize(&feed)?;
    let feed_vins = vin_list(&normalized)?;
    let confirmed_vins = ctx.confirmations.confirmed_vins(&feed_vins).await?;
    let partition = classifier::partition_by_confirmation(&normalized, &confirmed_vins)?;
    info!(
        unconfirmed = partition.unconfirmed.height(),
        confirmed = partition.confirmed.height(),
        "Feed classified"
    );

    ctx.queue.insert_pending(&partition.unconfirmed).await?;

    let unconfirmed_vins = vin_list(&partition.unconfirmed)?;
    let outcome = carryover::resolve(
        ctx.queue,
        partition.confirmed.clone(),
        &unconfirmed_vins,
        &ctx.rules,
    )
    .await?;
    let (artifacts, mut counts) = finish_run(
        ctx,
        &partition.unconfirmed,
        &partition.confirmed,
        outcome,
        Some(normalized),
    )
    .await?;
    counts.feed_rows = feed.height();

    let report = RunReport {
        run_id,
        entry_point: EntryPoint::Feed,
        status: RunStatus::Completed,
        counts,
    };
    info!(%run_id, outbound = report.counts.outbound_rows, "Feed run complete");
    Ok((artifacts, report))
}

/// Queue-only run: no feed is read, nothing is queued, but pending rows are
/// still drained and reported.
pub async fn execute_delta_run(
    ctx: &PipelineContext<'_>,
) -> Result<(RunArtifacts, RunReport)> {
    let run_id = Uuid::new_v4();
    info!(%run_id, "Starting delta-only run");

    let empty = empty_record_frame();
    let outcome = carryover::resolve(ctx.queue, empty.clone(), &[], &ctx.rules).await?;
    let (artifacts, counts) = finish_run(ctx, &empty, &empty, outcome, None).await?;

    let report = RunReport {
        run_id,
        entry_point: EntryPoint::DeltaOnly,
        status: RunStatus::Completed,
        counts,
    };
    info!(%run_id, outbound = report.counts.outbound_rows, "Delta-only run complete");
    Ok((artifacts, report))
}

async fn finish_run(
    ctx: &PipelineContext<'_>,
    unconfirmed: &DataFrame,
    confirmed: &DataFrame,
    outcome: CarryoverOutcome,
    backup: Option<DataFrame>,
) -> Result<(RunArtifacts, RunCounts)> {
    let outbound_vins = vin_list(&outcome.outbound)?;
    let dates = ctx.confirmations.confirmation_dates(&outbound_vins).await?;
    let dated = date_merger::overlay_confirmation_dates(&outcome.outbound, &dates)?;

    let consent = consent_rule::apply(&dated, &ctx.rules)?;
    if !consent.changed_vins.is_empty() {
        info!(
            flipped = consent.changed_vins.len(),
            "Consent rule rewrote survey agreements"
        );
    }

    let partitions = ManifestPartitions {
        unconfirmed,
        confirmed,
        carried: &outcome.carried,
        resend: &outcome.resend,
        public_service: &outcome.public_service,
    };
    let manifest = manifest::assemble(&partitions, ctx.contacts, &consent.changed_vins).await?;

    let outbound = composer::compose_outbound(&consent.records, &ctx.rules)?;

    let counts = RunCounts {
        feed_rows: 0,
        unconfirmed: unconfirmed.height(),
        confirmed: confirmed.height(),
        carried: outcome.carried.height(),
        resend: outcome.resend.height(),
        public_service: outcome.public_service.height(),
        consent_rule_applied: consent.changed_vins.len(),
        outbound_rows: outbound.height(),
        manifest_rows: manifest.height(),
    };
    let artifacts = RunArtifacts {
        outbound,
        manifest,
        backup,
    };
    Ok((artifacts, counts))
}

/// Top-level entry point for the daily batch: reads the feed and dispatches.
/// An absent or empty feed degrades to a delta-only run instead of failing.
pub async fn run(ctx: &PipelineContext<'_>, settings: &Settings) -> Result<RunReport> {
    let (artifacts, report) = match feed::read_feed(&settings.feed_path)? {
        Some(feed) => execute_feed_run(ctx, feed).await?,
        None => {
            warn!("No feed available, falling back to delta-only run");
            execute_delta_run(ctx).await?
        }
    };
    write_artifacts(&artifacts, settings)?;
    Ok(report)
}

/// Explicit queue-only entry point, independent of the feed file's state.
pub async fn run_delta_only(
    ctx: &PipelineContext<'_>,
    settings: &Settings,
) -> Result<RunReport> {
    let (artifacts, report) = execute_delta_run(ctx).await?;
    write_artifacts(&artifacts, settings)?;
    Ok(report)
}

fn write_artifacts(artifacts: &RunArtifacts, settings: &Settings) -> Result<()> {
    if let Some(backup) = &artifacts.backup {
        composer::write_backup(backup, &settings.backup_dir, Local::now())?;
    }
    composer::write_feed(&artifacts.outbound, &settings.outbound_path)?;
    composer::write_manifest(&artifacts.manifest, &settings.manifest_path)?;
    Ok(())
}
