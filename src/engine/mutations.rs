use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{
    month_of, now_ms, validate_booking_slot, validate_offset, validate_span, validate_text,
};
use super::{ledger, quota, Engine, EngineError, WalCommand};

impl Engine {
    // ── Coaches and their calendar ───────────────────────────

    pub async fn create_coach(
        &self,
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    ) -> Result<(), EngineError> {
        validate_text(&name, MAX_NAME_LEN, "coach name too long")?;
        validate_offset(utc_offset_minutes)?;

        let _registry = self.registry.write().await;
        if self.state.len() >= MAX_COACHES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many coaches"));
        }
        self.ensure_new_id(&id)?;

        let event = Event::CoachCreated {
            id,
            name: name.clone(),
            utc_offset_minutes,
        };
        self.wal_append(&event).await?;
        let cs = CoachState::new(id, name, utc_offset_minutes);
        self.state.insert(id, Arc::new(RwLock::new(cs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_coach(
        &self,
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    ) -> Result<(), EngineError> {
        validate_text(&name, MAX_NAME_LEN, "coach name too long")?;
        validate_offset(utc_offset_minutes)?;
        let mut guard = self.coach_write(&id).await?;
        let event = Event::CoachUpdated {
            id,
            name,
            utc_offset_minutes,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_working_window(
        &self,
        id: Ulid,
        coach_id: Ulid,
        weekday: u8,
        start_minute: u32,
        end_minute: u32,
    ) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::InvalidRequest("weekday must be 0 (Monday) to 6 (Sunday)"));
        }
        if start_minute >= end_minute || end_minute > 24 * 60 {
            return Err(EngineError::InvalidRequest(
                "window must satisfy 0 <= start_minute < end_minute <= 1440",
            ));
        }
        let mut guard = self.coach_write(&coach_id).await?;
        self.ensure_new_id(&id)?;
        if guard.windows.len() >= MAX_WINDOWS_PER_COACH {
            return Err(EngineError::LimitExceeded("too many working windows"));
        }
        let event = Event::WindowAdded {
            coach_id,
            window: WorkingWindow {
                id,
                weekday,
                start_minute,
                end_minute,
            },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_working_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (coach_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.windows.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WindowRemoved { id, coach_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(coach_id)
    }

    pub async fn add_time_off(&self, id: Ulid, coach_id: Ulid, span: Span) -> Result<(), EngineError> {
        validate_span(&span)?;
        let mut guard = self.coach_write(&coach_id).await?;
        self.ensure_new_id(&id)?;
        if guard.time_off.len() >= MAX_TIME_OFF_PER_COACH {
            return Err(EngineError::LimitExceeded("too many time-off entries"));
        }
        let event = Event::TimeOffAdded {
            coach_id,
            time_off: TimeOff { id, span },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_time_off(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (coach_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.time_off.iter().any(|t| t.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::TimeOffRemoved { id, coach_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(coach_id)
    }

    // ── Booking scheduler ────────────────────────────────────

    pub async fn create_booking(
        &self,
        id: Ulid,
        request: BookingRequest,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let mut created = self.create_bookings(request, vec![(id, span)]).await?;
        created
            .pop()
            .ok_or_else(|| EngineError::InvariantViolation("single booking produced no row".into()))
    }

    /// Book several slots for one attendee and credit source. All-or-nothing:
    /// the rows, one debit of `slots.len()` and any check-in claims are
    /// committed as a single WAL record, or nothing is written.
    pub async fn create_bookings(
        &self,
        request: BookingRequest,
        slots: Vec<(Ulid, Span)>,
    ) -> Result<Vec<Booking>, EngineError> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        if slots.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        if let Attendee::Invitee(name) = &request.attendee {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidRequest("invitee name is empty"));
            }
            if name.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("invitee name too long"));
            }
        }
        let client_id = request.attendee.client_id();
        if request.booking_type == BookingType::Checkin {
            if client_id.is_none() {
                return Err(EngineError::InvalidRequest("check-ins require a client"));
            }
            if request.credit != CreditSource::Unpackaged {
                return Err(EngineError::InvalidRequest("check-ins do not consume credit"));
            }
        }

        let now = now_ms();
        let mut seen = HashSet::with_capacity(slots.len());
        for (id, span) in &slots {
            validate_booking_slot(span, now)?;
            if !seen.insert(*id) {
                return Err(EngineError::AlreadyExists(*id));
            }
        }

        let mut guard = self.coach_write(&request.coach_id).await?;
        for (id, _) in &slots {
            self.ensure_new_id(id)?;
        }
        if guard.bookings.len() + slots.len() > MAX_BOOKINGS_PER_COACH {
            return Err(EngineError::LimitExceeded("too many bookings for coach"));
        }

        // Ledger and quota checks first; nothing is written if any fails.
        let count = slots.len() as u32;
        let debit = ledger::plan_debit(&guard, &request.credit, client_id, count, now)?;

        let mut checkins = Vec::new();
        if let (BookingType::Checkin, Some(client)) = (request.booking_type, client_id) {
            let mut months = HashSet::new();
            for (id, span) in &slots {
                let month = month_of(span.start, guard.utc_offset_minutes)
                    .ok_or(EngineError::InvalidSlot("slot outside calendar range"))?;
                if !months.insert(month) {
                    let err = EngineError::AlreadyUsed { client_id: client, month };
                    ledger::record_rejection(&err);
                    return Err(err);
                }
                let usage = quota::try_consume(&guard, client, month, *id).inspect_err(|e| {
                    ledger::record_rejection(e);
                })?;
                checkins.push(usage);
            }
        }

        let bookings: Vec<Booking> = slots
            .into_iter()
            .map(|(id, span)| Booking {
                id,
                coach_id: request.coach_id,
                attendee: request.attendee.clone(),
                booking_type: request.booking_type,
                span,
                status: BookingStatus::Confirmed,
                credit: request.credit,
                created_at: now,
            })
            .collect();

        let debited = match debit {
            Some(LedgerDebit::Package { count, .. } | LedgerDebit::Subscription { count, .. }) => {
                count as usize
            }
            None => bookings.len(),
        };
        if debited != bookings.len() {
            return Err(EngineError::InvariantViolation(format!(
                "debit of {debited} for {} bookings",
                bookings.len()
            )));
        }

        let event = Event::BookingsCreated {
            coach_id: request.coach_id,
            bookings: bookings.clone(),
            debit,
            checkins,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL,
            "type" => request.booking_type.as_str())
        .increment(bookings.len() as u64);
        Ok(bookings)
    }

    /// Confirmed → cancelled. The credit stays consumed.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition(id, BookingStatus::Cancelled).await
    }

    pub async fn mark_completed(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition(id, BookingStatus::Completed).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition(id, BookingStatus::NoShow).await
    }

    async fn transition(&self, id: Ulid, status: BookingStatus) -> Result<Ulid, EngineError> {
        let (coach_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                id,
                status: booking.status,
            });
        }
        let event = Event::BookingStatusChanged {
            id,
            coach_id,
            status,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(coach_id)
    }

    /// Hard delete from any status. Returns the package credited back, if any:
    /// only a still-confirmed, package-linked session is refunded. The status
    /// check, the refund and the removal are one record under one lock, so a
    /// repeat delete finds nothing and never credits twice.
    pub async fn delete_booking(&self, id: Ulid) -> Result<Option<Ulid>, EngineError> {
        let (coach_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        let refund = booking
            .credit
            .package_id()
            .filter(|_| booking.status == BookingStatus::Confirmed)
            .filter(|_| booking.booking_type == BookingType::Session)
            .filter(|pkg| guard.packages.contains_key(pkg));

        let event = Event::BookingDeleted {
            id,
            coach_id,
            refund,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if refund.is_some() {
            metrics::counter!(crate::observability::REFUNDS_TOTAL).increment(1);
        }
        Ok(refund)
    }

    /// Deletes one id at a time; each deletion re-checks its own booking.
    pub async fn delete_bookings(
        &self,
        ids: &[Ulid],
    ) -> Vec<(Ulid, Result<Option<Ulid>, EngineError>)> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            outcomes.push((id, self.delete_booking(id).await));
        }
        outcomes
    }

    /// Move a confirmed booking to `new_start`, keeping its duration and credit.
    pub async fn reschedule_booking(&self, id: Ulid, new_start: Ms) -> Result<Booking, EngineError> {
        let (coach_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                id,
                status: booking.status,
            });
        }
        if new_start == booking.span.start {
            return Err(EngineError::InvalidSlot("booking already starts at that time"));
        }
        let new_end = new_start
            .checked_add(booking.span.duration_ms())
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let span = Span::checked(new_start, new_end)
            .ok_or(EngineError::InvalidSlot("end must be after start"))?;
        validate_booking_slot(&span, now_ms())?;

        if booking.booking_type == BookingType::Checkin {
            let offset = guard.utc_offset_minutes;
            if month_of(booking.span.start, offset) != month_of(span.start, offset) {
                return Err(EngineError::InvalidSlot("check-in cannot move to another month"));
            }
        }

        let event = Event::BookingRescheduled { id, coach_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one snapshot record per coach. Coach registration is
    /// held off and every shard is read-locked until the new file is in place,
    /// so no append can land in the old file after its state was captured.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.read().await;
        let coaches: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(coaches.len());
        for cs in coaches {
            guards.push(cs.read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::CoachSnapshot { state: (**g).clone() })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
