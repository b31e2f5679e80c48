mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::SlotIter;
pub use error::EngineError;
pub use mutations::BookingRequest;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::SchedulePolicy;
use crate::model::*;
use crate::notify::{Notifier, NotifyHub};
use crate::wal::Wal;

pub type SharedTeacherBook = Arc<RwLock<TeacherBook>>;

// ── Group-commit journal channel ─────────────────────────

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

/// Background task owning the journal. Batches whatever appends are
/// immediately available into a single fsync, then acks every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel drained — flush what we have
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch (these callers were already told it failed).
    let flush_err = wal.flush_sync().err();
    let result = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
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

/// The booking engine: per-teacher lesson books behind their own locks, an
/// append-only journal for durability, and a notify hub for subscribers.
///
/// Holding a teacher's write lock across conflict check + journal append +
/// in-memory apply is what makes check-then-book atomic per teacher.
pub struct Engine {
    pub state: DashMap<Ulid, SharedTeacherBook>,
    pub policy: SchedulePolicy,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) notifier: Arc<dyn Notifier>,
    /// Reverse lookup: lesson id → teacher id.
    pub(super) lesson_to_teacher: DashMap<Ulid, Ulid>,
}

/// Apply an event to a teacher's book. No locking, no validation — callers
/// hold the lock and events were validated before they were journaled.
fn apply_to_book(book: &mut TeacherBook, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::LessonBooked { lesson } => {
            book.insert_lesson(lesson.clone());
            index.insert(lesson.id, lesson.teacher_id);
        }
        Event::LessonConfirmed { id, at, .. } => {
            if let Some(l) = book.lesson_mut(id) {
                l.status = LessonStatus::Scheduled;
                l.updated_at = *at;
            }
        }
        Event::LessonRescheduled { id, span, at, .. } => {
            book.reschedule_lesson(id, *span, *at);
        }
        Event::LessonCancelled { id, at, .. } => {
            if let Some(l) = book.lesson_mut(id) {
                l.status = LessonStatus::Cancelled;
                l.updated_at = *at;
            }
        }
        Event::LessonCompleted { id, at, .. } => {
            if let Some(l) = book.lesson_mut(id) {
                l.status = LessonStatus::Completed;
                l.updated_at = *at;
            }
        }
        Event::StudentJoined { id, student_id, at, .. } => {
            if let Some(l) = book.lesson_mut(id) {
                if !l.students.contains(student_id) {
                    l.students.push(*student_id);
                }
                l.updated_at = *at;
            }
        }
        Event::StudentLeft { id, student_id, at, .. } => {
            if let Some(l) = book.lesson_mut(id) {
                l.students.retain(|s| s != student_id);
                l.updated_at = *at;
            }
        }
        // Handled at the state-map level, not per book.
        Event::TeacherRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        policy: SchedulePolicy,
        notify: Arc<NotifyHub>,
        notifier: Arc<dyn Notifier>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            policy,
            notify,
            wal_tx,
            notifier,
            lesson_to_teacher: DashMap::new(),
        };

        // Replay — we are the sole owner of these Arcs, so try_write always
        // succeeds instantly. blocking_write would panic inside a runtime.
        for event in &events {
            match event {
                Event::TeacherRegistered { id, name, .. } => {
                    let book = TeacherBook::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(book)));
                }
                other => {
                    if let Some(teacher_id) = event_teacher_id(other)
                        && let Some(entry) = engine.state.get(&teacher_id)
                    {
                        let book_arc = entry.clone();
                        let mut guard = book_arc.try_write().expect("replay: uncontended write");
                        apply_to_book(&mut guard, other, &engine.lesson_to_teacher);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Journal an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_teacher(&self, id: &Ulid) -> Option<SharedTeacherBook> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn teacher_for_lesson(&self, lesson_id: &Ulid) -> Option<Ulid> {
        self.lesson_to_teacher.get(lesson_id).map(|e| *e.value())
    }

    /// Journal + apply + publish in one call, then fire the external notifier
    /// without awaiting it.
    pub(super) async fn persist_and_apply(
        &self,
        teacher_id: Ulid,
        book: &mut TeacherBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.lesson_to_teacher);
        self.notify.send(teacher_id, event);
        self.dispatch_notification(event, book);
        Ok(())
    }

    /// Best-effort external delivery. Spawned so a slow or failing notifier
    /// never blocks or reverts the transition; failures are logged at warn.
    fn dispatch_notification(&self, event: &Event, book: &TeacherBook) {
        let kind = event.kind();
        let lesson = match event {
            Event::TeacherRegistered { .. } => return,
            Event::LessonBooked { lesson } => Some(lesson.clone()),
            Event::LessonConfirmed { id, .. }
            | Event::LessonRescheduled { id, .. }
            | Event::LessonCancelled { id, .. }
            | Event::LessonCompleted { id, .. }
            | Event::StudentJoined { id, .. }
            | Event::StudentLeft { id, .. } => book.lesson(id).cloned(),
        };
        let Some(lesson) = lesson else { return };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(kind, lesson).await {
                tracing::warn!("notification delivery failed ({kind}): {e}");
            }
        });
    }

    /// Lesson id → its teacher's book, write-locked.
    pub(super) async fn resolve_lesson_write(
        &self,
        lesson_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TeacherBook>), EngineError> {
        let teacher_id = self
            .teacher_for_lesson(lesson_id)
            .ok_or(EngineError::NotFound(*lesson_id))?;
        let book = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = book.write_owned().await;
        Ok((teacher_id, guard))
    }
}

/// Extract the teacher id from any lesson-scoped event.
fn event_teacher_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::LessonBooked { lesson } => Some(lesson.teacher_id),
        Event::LessonConfirmed { teacher_id, .. }
        | Event::LessonRescheduled { teacher_id, .. }
        | Event::LessonCancelled { teacher_id, .. }
        | Event::LessonCompleted { teacher_id, .. }
        | Event::StudentJoined { teacher_id, .. }
        | Event::StudentLeft { teacher_id, .. } => Some(*teacher_id),
        Event::TeacherRegistered { .. } => None,
    }
}
