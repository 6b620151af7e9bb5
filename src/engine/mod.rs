mod availability;
mod error;
mod ledger;
mod mutations;
mod queries;
mod quota;
mod sweep;
mod validate;

pub use availability::{merge_overlapping, open_time, partition_windows, subtract_intervals};
pub use error::EngineError;
pub use validate::{first_of_month, local_date, local_day_span, month_of, weekday_index};

pub(crate) use validate::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCoachState = Arc<RwLock<CoachState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// One engine per tenant: coach shards in memory, every change in the WAL.
pub struct Engine {
    pub state: DashMap<Ulid, SharedCoachState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (booking/package/subscription/window/time-off) id → coach id
    pub(super) entity_to_coach: DashMap<Ulid, Ulid>,
    /// Coach registration takes this for writing; compaction for reading.
    pub(super) registry: RwLock<()>,
}

/// Apply an event directly to a CoachState. The caller holds the lock.
fn apply_to_coach(cs: &mut CoachState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CoachUpdated {
            name,
            utc_offset_minutes,
            ..
        } => {
            cs.name = name.clone();
            cs.utc_offset_minutes = *utc_offset_minutes;
        }
        Event::WindowAdded { coach_id, window } => {
            cs.windows.push(*window);
            entity_map.insert(window.id, *coach_id);
        }
        Event::WindowRemoved { id, .. } => {
            cs.windows.retain(|w| w.id != *id);
            entity_map.remove(id);
        }
        Event::TimeOffAdded { coach_id, time_off } => {
            let pos = cs
                .time_off
                .partition_point(|t| t.span.start <= time_off.span.start);
            cs.time_off.insert(pos, *time_off);
            entity_map.insert(time_off.id, *coach_id);
        }
        Event::TimeOffRemoved { id, .. } => {
            cs.time_off.retain(|t| t.id != *id);
            entity_map.remove(id);
        }
        Event::PackageCreated { package } => {
            cs.packages.insert(package.id, package.clone());
            entity_map.insert(package.id, package.coach_id);
        }
        Event::PackageRegranted {
            package_id,
            additional,
            at,
            ..
        } => ledger::apply_regrant(cs, *package_id, *additional, *at),
        Event::PackageAdjusted {
            adjustment,
            expires_at,
            ..
        } => ledger::apply_package_adjustment(cs, adjustment, *expires_at),
        Event::SubscriptionCreated { subscription } => {
            cs.subscriptions.insert(subscription.id, subscription.clone());
            entity_map.insert(subscription.id, subscription.coach_id);
        }
        Event::SubscriptionActiveSet {
            subscription_id,
            is_active,
            at,
            ..
        } => {
            if let Some(sub) = cs.subscriptions.get_mut(subscription_id) {
                sub.is_active = *is_active;
                sub.updated_at = *at;
                sub.version += 1;
            }
        }
        Event::SubscriptionReplenished {
            subscription_id,
            month,
            new_balance,
            at,
            ..
        } => ledger::apply_subscription_balance(cs, *subscription_id, *new_balance, Some(*month), *at),
        Event::SubscriptionAdjusted {
            subscription_id,
            new_balance,
            at,
            ..
        } => ledger::apply_subscription_balance(cs, *subscription_id, *new_balance, None, *at),
        Event::BookingsCreated {
            coach_id,
            bookings,
            debit,
            checkins,
        } => {
            let at = bookings.first().map_or(0, |b| b.created_at);
            for booking in bookings {
                cs.bookings.insert(booking.id, booking.clone());
                entity_map.insert(booking.id, *coach_id);
            }
            if let Some(debit) = debit {
                ledger::apply_debit(cs, debit, at);
            }
            for usage in checkins {
                quota::apply_consume(cs, usage);
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = cs.bookings.get_mut(id)
                && booking.status == BookingStatus::Confirmed
            {
                booking.status = *status;
            }
        }
        Event::BookingsSwept { ids, .. } => {
            for id in ids {
                if let Some(booking) = cs.bookings.get_mut(id)
                    && booking.status == BookingStatus::Confirmed
                {
                    booking.status = BookingStatus::Completed;
                }
            }
        }
        Event::BookingRescheduled { id, span, .. } => {
            if let Some(booking) = cs.bookings.get_mut(id) {
                booking.span = *span;
            }
        }
        Event::BookingDeleted { id, refund, at, .. } => {
            cs.bookings.remove(id);
            entity_map.remove(id);
            if let Some(package_id) = refund {
                ledger::credit_package(cs, *package_id, 1, *at);
            }
        }
        // CoachCreated/CoachSnapshot are handled at the DashMap level, not here
        Event::CoachCreated { .. } | Event::CoachSnapshot { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_coach: DashMap::new(),
            registry: RwLock::new(()),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here: this may run inside
        // an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::CoachCreated {
                    id,
                    name,
                    utc_offset_minutes,
                } => {
                    let cs = CoachState::new(*id, name.clone(), *utc_offset_minutes);
                    engine.state.insert(*id, Arc::new(RwLock::new(cs)));
                }
                Event::CoachSnapshot { state } => engine.install_snapshot(state.clone()),
                other => {
                    let coach = engine.get_coach(&other.coach_id());
                    if let Some(coach) = coach
                        && let Ok(mut guard) = coach.try_write()
                    {
                        apply_to_coach(&mut guard, other, &engine.entity_to_coach);
                    }
                }
            }
        }

        Ok(engine)
    }

    fn install_snapshot(&self, state: CoachState) {
        for entity_id in state.entity_ids() {
            self.entity_to_coach.insert(entity_id, state.id);
        }
        self.state.insert(state.id, Arc::new(RwLock::new(state)));
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_coach(&self, id: &Ulid) -> Option<SharedCoachState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_coach_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_coach.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify. The caller holds the coach's write lock,
    /// so validation, durability and the in-memory change form one transaction.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut CoachState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_coach(cs, event, &self.entity_to_coach);
        self.notify.send(cs.id, event);
        Ok(())
    }

    pub(super) async fn coach_write(
        &self,
        coach_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<CoachState>, EngineError> {
        let cs = self
            .get_coach(coach_id)
            .ok_or(EngineError::NotFound(*coach_id))?;
        Ok(cs.write_owned().await)
    }

    /// Lookup entity → coach, get coach, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<CoachState>), EngineError> {
        let coach_id = self
            .get_coach_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.coach_write(&coach_id).await?;
        Ok((coach_id, guard))
    }

    pub(super) fn ensure_new_id(&self, id: &Ulid) -> Result<(), EngineError> {
        if self.entity_to_coach.contains_key(id) || self.state.contains_key(id) {
            return Err(EngineError::AlreadyExists(*id));
        }
        Ok(())
    }
}
