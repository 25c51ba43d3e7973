// crates/vindelta-core/src/carryover.rs

use std::collections::HashSet;

use polars::prelude::*;

use crate::delta_queue::DeltaQueue;
use crate::error::{PipelineError, Result};
use crate::types::{vin_list, CarryoverPhase, RuleConfig, COL_VIN};
use tracing::info;

/// Result of draining the queue against today's confirmations.
pub struct CarryoverOutcome {
    /// Everything heading into the corrected feed: direct confirmations plus
    /// the carried and resend rows.
    pub outbound: DataFrame,
    /// Queue rows resolved by a fresh confirmation.
    pub carried: DataFrame,
    /// Queue rows flagged for a resend.
    pub resend: DataFrame,
    /// Confirmed non-private rows. Reported, never re-emitted in the feed.
    pub public_service: DataFrame,
}

/// Drains the queue in three phases: confirmed private-use rows, confirmed
/// public-service rows, resend requests. Each phase is retired from the queue
/// before the next is read. Rows whose VIN was already claimed by an earlier
/// phase (or by today's feed, confirmed or not) are retired but not
/// re-emitted, so every VIN keeps a single provenance. `feed_unconfirmed`
/// matters for re-queued VINs: the feed repeats a VIN that is still pending,
/// and a stale resend flag on it must not produce a second provenance.
pub async fn resolve(
    queue: &dyn DeltaQueue,
    confirmed: DataFrame,
    feed_unconfirmed: &[String],
    rules: &RuleConfig,
) -> Result<CarryoverOutcome> {
    let mut claimed: HashSet<String> = vin_list(&confirmed)?.into_iter().collect();
    claimed.extend(feed_unconfirmed.iter().cloned());

    let carried_raw = queue.confirmed_pending().await?;
    retire(queue, &carried_raw, CarryoverPhase::ConfirmedPending).await?;
    let carried = without_claimed(&carried_raw, &mut claimed)?;

    let public_raw = queue
        .public_service_pending(rules.public_service_batch_limit)
        .await?;
    retire(queue, &public_raw, CarryoverPhase::PublicService).await?;
    let public_service = without_claimed(&public_raw, &mut claimed)?;

    let resend_raw = queue.resend_pending().await?;
    retire(queue, &resend_raw, CarryoverPhase::Resend).await?;
    let resend = without_claimed(&resend_raw, &mut claimed)?;

    let mut outbound = confirmed;
    outbound.vstack_mut(&carried)?;
    outbound.vstack_mut(&resend)?;

    info!(
        carried = carried.height(),
        resend = resend.height(),
        public_service = public_service.height(),
        "Carryover resolved"
    );
    Ok(CarryoverOutcome {
        outbound,
        carried,
        resend,
        public_service,
    })
}

async fn retire(queue: &dyn DeltaQueue, rows: &DataFrame, phase: CarryoverPhase) -> Result<()> {
    if rows.height() == 0 {
        return Ok(());
    }
    let vins = vin_list(rows)?;
    queue
        .mark_consumed(&vins)
        .await
        .map_err(|err| PipelineError::StateUpdate {
            phase,
            detail: err.to_string(),
        })?;
    Ok(())
}

/// Keeps only rows whose VIN is not yet claimed, and claims the survivors.
fn without_claimed(df: &DataFrame, claimed: &mut HashSet<String>) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df.clone());
    }
    let flags: Vec<bool> = {
        let vins = df.column(COL_VIN)?.str()?;
        (0..df.height())
            .map(|idx| {
                let vin = vins.get(idx).unwrap_or("");
                claimed.insert(vin.to_string())
            })
            .collect()
    };
    let mask = BooleanChunked::from_slice("unclaimed".into(), &flags);
    Ok(df.filter(&mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta_queue::{frame_from_records, MemoryDeltaQueue};
    use crate::types::{empty_record_frame, FEED_COLUMNS};

    fn record(vin: &str, vehicle_type: &str) -> DataFrame {
        let vin_pos = FEED_COLUMNS.iter().position(|c| *c == "vin").unwrap();
        let type_pos = FEED_COLUMNS
            .iter()
            .position(|c| *c == "vehicle_type")
            .unwrap();
        let mut values = vec![None; FEED_COLUMNS.len()];
        values[vin_pos] = Some(vin.to_string());
        values[type_pos] = Some(vehicle_type.to_string());
        frame_from_records(vec![values]).unwrap()
    }

    #[tokio::test]
    async fn phases_resolve_in_order_and_retire() {
        let rules = RuleConfig::default();
        let queue = MemoryDeltaQueue::new(rules.clone());
        queue.insert_pending(&record("VF1A", "VP")).await.unwrap();
        queue.insert_pending(&record("VU1", "VU")).await.unwrap();
        queue.insert_pending(&record("VF1R", "VP")).await.unwrap();
        queue.confirm("VF1A");
        queue.confirm("VU1");
        queue.request_resend("VF1R");

        let outcome = resolve(&queue, empty_record_frame(), &[], &rules)
            .await
            .unwrap();
        assert_eq!(outcome.carried.height(), 1);
        assert_eq!(outcome.public_service.height(), 1);
        assert_eq!(outcome.resend.height(), 1);
        assert_eq!(outcome.outbound.height(), 2);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn claimed_vins_are_retired_but_not_duplicated() {
        let rules = RuleConfig::default();
        let queue = MemoryDeltaQueue::new(rules.clone());
        queue.insert_pending(&record("VF1A", "VP")).await.unwrap();
        queue.confirm("VF1A");
        queue.request_resend("VF1A");

        // the same VIN is also directly confirmed in today's feed
        let outcome = resolve(&queue, record("VF1A", "VP"), &[], &rules)
            .await
            .unwrap();
        assert_eq!(outcome.carried.height(), 0);
        assert_eq!(outcome.resend.height(), 0);
        assert_eq!(outcome.outbound.height(), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn resend_flag_on_requeued_feed_vin_is_retired_silently() {
        let rules = RuleConfig::default();
        let queue = MemoryDeltaQueue::new(rules.clone());
        queue.insert_pending(&record("VF1X", "VP")).await.unwrap();
        queue.request_resend("VF1X");

        // still unconfirmed in today's feed; the feed owns the VIN
        let unconfirmed = vec!["VF1X".to_string()];
        let outcome = resolve(&queue, empty_record_frame(), &unconfirmed, &rules)
            .await
            .unwrap();
        assert_eq!(outcome.resend.height(), 0);
        assert_eq!(outcome.outbound.height(), 0);
        assert_eq!(queue.pending_count(), 0);
    }
}
