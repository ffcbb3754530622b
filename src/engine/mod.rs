mod availability;
mod composer;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;

pub use availability::{days_in_month, is_day_open, open_days_in_month};
pub use composer::BookingComposer;
pub use error::{EngineError, ErrorKind};
pub use lifecycle::{ALL_STATUSES, actors_for, initial_status};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::WAL_APPEND_TIMEOUT_MS;
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
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedCoachState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → coach id.
    pub(super) booking_to_coach: DashMap<Ulid, Ulid>,
    /// Client id → booking ids, across coaches.
    pub(super) client_bookings: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event directly to a CoachState (no locking — caller holds the
/// lock). Index maps are updated alongside so replay and live writes go
/// through one code path.
fn apply_to_coach(
    cs: &mut CoachState,
    event: &Event,
    booking_map: &DashMap<Ulid, Ulid>,
    client_map: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::DateOpened { date, .. } => {
            cs.open_dates.insert(*date);
        }
        Event::DateClosed { date, .. } => {
            cs.open_dates.remove(date);
        }
        Event::BookingCreated {
            id,
            coach_id,
            client_id,
            sessions,
            total_price,
            payment_method,
            status,
            created_at,
            approved_by,
            started_at,
            completed_at,
        } => {
            cs.bookings.push(Booking {
                id: *id,
                coach_id: *coach_id,
                client_id: *client_id,
                sessions: sessions.clone(),
                total_price: *total_price,
                payment_method: *payment_method,
                status: *status,
                created_at: *created_at,
                approved_by: *approved_by,
                started_at: *started_at,
                completed_at: *completed_at,
            });
            booking_map.insert(*id, *coach_id);
            client_map.entry(*client_id).or_default().push(*id);
        }
        Event::BookingTransitioned { id, to, actor, at, .. } => {
            // Decision happened before the WAL append; this only re-applies it.
            if let Some(b) = cs.booking_mut(*id) {
                lifecycle::apply(b, *to, *actor, *at);
            }
        }
        Event::CoachUpdated {
            price_per_session,
            session_minutes,
            ..
        } => {
            cs.price_per_session = *price_per_session;
            cs.session_minutes = *session_minutes;
        }
        // Registration/removal are handled at the DashMap level, not here
        Event::CoachRegistered { .. } | Event::CoachRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_coach: DashMap::new(),
            client_bookings: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::CoachRegistered {
                    id,
                    category,
                    price_per_session,
                    session_minutes,
                } => {
                    let cs = CoachState::new(*id, *category, *price_per_session, *session_minutes);
                    engine.state.insert(*id, Arc::new(RwLock::new(cs)));
                }
                Event::CoachRemoved { id } => {
                    if let Some(entry) = engine.state.get(id) {
                        let cs = entry.try_read().expect("replay: uncontended read");
                        for b in &cs.bookings {
                            engine.booking_to_coach.remove(&b.id);
                            if let Some(mut ids) = engine.client_bookings.get_mut(&b.client_id) {
                                ids.retain(|x| *x != b.id);
                            }
                        }
                    }
                    engine.state.remove(id);
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.coach_id()) {
                        let cs_arc = entry.clone();
                        let mut guard = cs_arc.try_write().expect("replay: uncontended write");
                        apply_to_coach(
                            &mut guard,
                            other,
                            &engine.booking_to_coach,
                            &engine.client_bookings,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer. Bounded:
    /// a stuck writer surfaces as a retryable store error, not a hang.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        match tokio::time::timeout(Duration::from_millis(WAL_APPEND_TIMEOUT_MS), rx).await {
            Err(_) => Err(EngineError::WalError("WAL append timed out".into())),
            Ok(Err(_)) => Err(EngineError::WalError("WAL writer dropped response".into())),
            Ok(Ok(result)) => result.map_err(|e| EngineError::WalError(e.to_string())),
        }
    }

    pub fn get_coach(&self, id: &Ulid) -> Option<SharedCoachState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn coach_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_coach.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, all under the coach write
    /// lock held by the caller. The durable write happens first; if it
    /// fails, nothing is applied and nothing is published.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut CoachState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_coach(cs, event, &self.booking_to_coach, &self.client_bookings);
        self.notify.publish(event);
        Ok(())
    }

    /// Lookup booking → coach, get coach, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CoachState>), EngineError> {
        let coach_id = self
            .coach_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = cs.write_owned().await;
        Ok((coach_id, guard))
    }
}
