use chrono::NaiveDate;
use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{open_time, partition_windows};
use super::validate::{local_day_span, now_ms, weekday_index};
use super::{Engine, EngineError};

/// Working windows of `date` as absolute spans, plus the time off touching that day.
fn day_calendar(cs: &CoachState, date: NaiveDate) -> Result<(Span, Vec<Span>, Vec<Span>), EngineError> {
    let day = local_day_span(date, cs.utc_offset_minutes)
        .ok_or(EngineError::InvalidRequest("date out of range"))?;
    let weekday = weekday_index(date);
    let windows = cs
        .windows
        .iter()
        .filter(|w| w.weekday == weekday)
        .map(|w| {
            Span::new(
                day.start + w.start_minute as Ms * MINUTE_MS,
                day.start + w.end_minute as Ms * MINUTE_MS,
            )
        })
        .collect();
    let blocked = cs
        .time_off
        .iter()
        .filter(|t| t.span.overlaps(&day))
        .map(|t| t.span)
        .collect();
    Ok((day, windows, blocked))
}

impl Engine {
    async fn coach_read(&self, coach_id: &Ulid) -> Option<OwnedRwLockReadGuard<CoachState>> {
        let cs = self.get_coach(coach_id)?;
        Some(cs.read_owned().await)
    }

    async fn entity_read(&self, entity_id: &Ulid) -> Result<OwnedRwLockReadGuard<CoachState>, EngineError> {
        let coach_id = self
            .get_coach_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        self.coach_read(&coach_id)
            .await
            .ok_or(EngineError::NotFound(*entity_id))
    }

    /// Candidate slots of `duration_minutes` on the coach-local `date`.
    /// Existing bookings are not consulted.
    pub async fn get_slots(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Span>, EngineError> {
        self.get_slots_at(coach_id, date, duration_minutes, now_ms()).await
    }

    /// As `get_slots`, with an explicit "now": a day already over yields
    /// nothing, and today's slots that have started are dropped.
    pub async fn get_slots_at(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
        now: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        if duration_minutes == 0 {
            return Err(EngineError::InvalidRequest("duration must be positive"));
        }
        if duration_minutes > MAX_SLOT_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("slot duration too long"));
        }
        let Some(guard) = self.coach_read(&coach_id).await else {
            return Ok(vec![]);
        };
        let (day, windows, blocked) = day_calendar(&guard, date)?;
        if day.end <= now {
            return Ok(vec![]);
        }
        Ok(partition_windows(
            &windows,
            &blocked,
            duration_minutes as Ms * MINUTE_MS,
            now,
        ))
    }

    /// Working time left on `date` after time off, as merged spans.
    pub async fn get_open_time(&self, coach_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let Some(guard) = self.coach_read(&coach_id).await else {
            return Ok(vec![]);
        };
        let (_, windows, blocked) = day_calendar(&guard, date)?;
        Ok(open_time(&windows, &blocked))
    }

    pub async fn list_coaches(&self) -> Vec<CoachInfo> {
        let coaches: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(coaches.len());
        for cs in coaches {
            let guard = cs.read().await;
            out.push(CoachInfo {
                id: guard.id,
                name: guard.name.clone(),
                utc_offset_minutes: guard.utc_offset_minutes,
            });
        }
        out.sort_by_key(|c| c.id);
        out
    }

    pub async fn list_windows(&self, coach_id: Ulid) -> Vec<WorkingWindow> {
        let Some(guard) = self.coach_read(&coach_id).await else {
            return vec![];
        };
        let mut windows = guard.windows.clone();
        windows.sort_by_key(|w| (w.weekday, w.start_minute, w.id));
        windows
    }

    pub async fn list_time_off(&self, coach_id: Ulid) -> Vec<TimeOff> {
        match self.coach_read(&coach_id).await {
            Some(guard) => guard.time_off.clone(),
            None => vec![],
        }
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.entity_read(&id).await?;
        guard.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings of a coach ordered by start.
    pub async fn list_bookings(&self, coach_id: Ulid) -> Vec<Booking> {
        let Some(guard) = self.coach_read(&coach_id).await else {
            return vec![];
        };
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.span.start, b.id));
        bookings
    }

    pub async fn get_package(&self, id: Ulid) -> Result<SessionPackage, EngineError> {
        let guard = self.entity_read(&id).await?;
        guard.packages.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_packages(&self, coach_id: Ulid) -> Vec<SessionPackage> {
        let Some(guard) = self.coach_read(&coach_id).await else {
            return vec![];
        };
        let mut packages: Vec<SessionPackage> = guard.packages.values().cloned().collect();
        packages.sort_by_key(|p| (p.created_at, p.id));
        packages
    }

    /// Audit trail of one package, oldest first.
    pub async fn package_adjustments(&self, package_id: Ulid) -> Result<Vec<PackageAdjustment>, EngineError> {
        let guard = self.entity_read(&package_id).await?;
        if !guard.packages.contains_key(&package_id) {
            return Err(EngineError::NotFound(package_id));
        }
        Ok(guard
            .adjustments
            .iter()
            .filter(|a| a.package_id == package_id)
            .cloned()
            .collect())
    }

    pub async fn get_subscription(&self, id: Ulid) -> Result<ClientSubscription, EngineError> {
        let guard = self.entity_read(&id).await?;
        guard
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_subscriptions(&self, coach_id: Ulid) -> Vec<ClientSubscription> {
        let Some(guard) = self.coach_read(&coach_id).await else {
            return vec![];
        };
        let mut subs: Vec<ClientSubscription> = guard.subscriptions.values().cloned().collect();
        subs.sort_by_key(|s| (s.created_at, s.id));
        subs
    }

    /// `None` when the client has not used the month's check-in.
    pub async fn checkin_usage(
        &self,
        client_id: Ulid,
        coach_id: Ulid,
        month: MonthKey,
    ) -> Option<CheckinUsage> {
        let guard = self.coach_read(&coach_id).await?;
        guard
            .checkins
            .get(&(client_id, super::first_of_month(month)))
            .cloned()
    }
}
