use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Move every confirmed booking of `coach_id` that ended at or before
    /// `now` to completed. Bookings already out of `confirmed` are untouched,
    /// and the apply step re-checks the status, so repeated or overlapping
    /// sweeps are no-ops. Never touches the ledger.
    pub async fn sweep_past_sessions(&self, coach_id: Ulid, now: Ms) -> Result<usize, EngineError> {
        let mut guard = self.coach_write(&coach_id).await?;
        let mut ids: Vec<Ulid> = guard
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.span.end <= now)
            .map(|b| b.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        ids.sort();
        let swept = ids.len();

        let event = Event::BookingsSwept { coach_id, ids, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::SWEPT_BOOKINGS_TOTAL).increment(swept as u64);
        Ok(swept)
    }

    /// Sweep every coach. A coach removed mid-pass is skipped.
    pub async fn sweep_all(&self, now: Ms) -> Result<usize, EngineError> {
        let coach_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut total = 0;
        for coach_id in coach_ids {
            match self.sweep_past_sessions(coach_id, now).await {
                Ok(n) => total += n,
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}
