//! SessionRegistry - actor that owns the admission table
//!
//! Every mutation goes through one task's mailbox, so the concurrency-cap
//! check and the insert that follows it can never interleave with another
//! admission.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::messages::{RegistryCommand, RegistryError, RegistryResponse, RegistryStats, SessionReport};
use crate::domain::{Preferences, Session, SessionId, SessionStatus};

/// Mailbox depth for registry commands
const COMMAND_BUFFER: usize = 256;

/// One tracked session
#[derive(Debug)]
struct Entry {
    session: Session,
    admitted_at: Instant,
    finished_at: Option<Instant>,
}

/// The admission table; only the actor task touches it
#[derive(Debug)]
struct Sessions {
    entries: HashMap<SessionId, Entry>,
    max_sessions: usize,
    idle_timeout: Duration,
    stats: RegistryStats,
    processing_total: Duration,
}

impl Sessions {
    fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_sessions,
            idle_timeout,
            stats: RegistryStats {
                capacity: max_sessions,
                ..Default::default()
            },
            processing_total: Duration::ZERO,
        }
    }

    fn active(&self) -> usize {
        self.entries.values().filter(|e| e.session.status.is_active()).count()
    }

    fn admit(&mut self, request: String, preferences: Preferences) -> RegistryResponse<SessionId> {
        let active = self.active();
        if active >= self.max_sessions {
            self.stats.rejected += 1;
            debug!(active, max = self.max_sessions, "Sessions::admit: at capacity");
            return Err(RegistryError::CapacityExceeded {
                active,
                max: self.max_sessions,
            });
        }

        let session = Session::new(request, preferences);
        let id = session.id.clone();
        self.entries.insert(
            id.clone(),
            Entry {
                session,
                admitted_at: Instant::now(),
                finished_at: None,
            },
        );
        self.stats.admitted += 1;
        info!(session_id = %id, active = active + 1, "Session admitted");
        Ok(id)
    }

    fn get(&self, id: &SessionId) -> RegistryResponse<Session> {
        self.entries
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    fn report(&self, id: &SessionId, now: Instant) -> RegistryResponse<SessionReport> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let end = entry.finished_at.unwrap_or(now);
        Ok(SessionReport {
            session: entry.session.clone(),
            processing_secs: end.saturating_duration_since(entry.admitted_at).as_secs_f64(),
        })
    }

    fn transition(&mut self, id: &SessionId, next: SessionStatus) -> RegistryResponse<Session> {
        self.transition_at(id, next, Instant::now())
    }

    /// Apply a lifecycle transition; terminal ones are stamped with `now`
    fn transition_at(&mut self, id: &SessionId, next: SessionStatus, now: Instant) -> RegistryResponse<Session> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let current = entry.session.status;
        match current {
            SessionStatus::Expired => return Err(RegistryError::Expired(id.clone())),
            SessionStatus::Cancelled => return Err(RegistryError::Cancelled(id.clone())),
            _ => {}
        }
        if !current.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from: current,
                to: next,
            });
        }

        debug!(session_id = %id, from = %current, to = %next, "Sessions::transition");
        entry.session.status = next;
        if next.is_terminal() {
            entry.finished_at = Some(now);
            self.processing_total += now.saturating_duration_since(entry.admitted_at);
            match next {
                SessionStatus::Completed => self.stats.completed += 1,
                SessionStatus::Failed => self.stats.failed += 1,
                SessionStatus::Expired => self.stats.expired += 1,
                SessionStatus::Cancelled => self.stats.cancelled += 1,
                SessionStatus::Pending | SessionStatus::Running => {}
            }
        }
        Ok(entry.session.clone())
    }

    fn cancel(&mut self, id: &SessionId, now: Instant) -> RegistryResponse<SessionReport> {
        self.transition_at(id, SessionStatus::Cancelled, now)?;
        info!(session_id = %id, "Session cancelled");
        self.report(id, now)
    }

    fn retire(&mut self, id: &SessionId) -> RegistryResponse<Session> {
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if entry.session.status.is_active() {
            // Retiring an unfinished session still frees its slot
            warn!(session_id = %id, status = %entry.session.status, "Retiring session that never finished");
        }
        debug!(session_id = %id, "Sessions::retire: removed");
        Ok(entry.session)
    }

    /// Expire unfinished sessions past the idle timeout and drop finished
    /// entries nobody retired within another timeout period
    fn expire_idle(&mut self, now: Instant) -> Vec<SessionId> {
        let timeout = self.idle_timeout;
        let overdue: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.session.status.is_active() && now.duration_since(e.admitted_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &overdue {
            if self.transition_at(id, SessionStatus::Expired, now).is_ok() {
                info!(session_id = %id, "Session expired");
            }
        }

        let before = self.entries.len();
        self.entries.retain(|_, e| match e.finished_at {
            Some(finished) => now.saturating_duration_since(finished) < timeout,
            None => true,
        });
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "Sessions::expire_idle: dropped unretired finished sessions");
        }

        overdue
    }

    fn stats(&self) -> RegistryStats {
        let mut stats = self.stats.clone();
        stats.pending = 0;
        stats.running = 0;
        for entry in self.entries.values() {
            match entry.session.status {
                SessionStatus::Pending => stats.pending += 1,
                SessionStatus::Running => stats.running += 1,
                _ => {}
            }
        }
        stats.tracked = self.entries.len();
        let finished = stats.finished();
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
            stats.avg_processing_secs = self.processing_total.as_secs_f64() / finished as f64;
        }
        stats
    }
}

/// Handle to send commands to the registry actor
#[derive(Clone)]
pub struct SessionRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl SessionRegistry {
    /// Spawn the registry actor; must be called inside a tokio runtime
    pub fn spawn(max_sessions: usize, idle_timeout: Duration) -> Self {
        debug!(max_sessions, ?idle_timeout, "SessionRegistry::spawn: called");
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(actor_loop(Sessions::new(max_sessions.max(1), idle_timeout), rx));
        info!(max_sessions, "SessionRegistry spawned");
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand) -> Result<T, RegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelError)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelError)
    }

    /// Admit a request, or reject it when every slot is taken
    pub async fn admit(&self, request: impl Into<String>, preferences: Preferences) -> RegistryResponse<SessionId> {
        let request = request.into();
        debug!(request_len = request.len(), "admit: called");
        self.request(|reply| RegistryCommand::Admit {
            request,
            preferences,
            reply,
        })
        .await?
    }

    pub async fn get(&self, id: &SessionId) -> RegistryResponse<Session> {
        debug!(%id, "get: called");
        self.request(|reply| RegistryCommand::Get { id: id.clone(), reply })
            .await?
    }

    /// `pending -> running`
    pub async fn start(&self, id: &SessionId) -> RegistryResponse<Session> {
        debug!(%id, "start: called");
        self.request(|reply| RegistryCommand::Start { id: id.clone(), reply })
            .await?
    }

    /// `running -> completed | failed`; fails with `Expired` if the sweeper
    /// got there first
    pub async fn finish(&self, id: &SessionId, status: SessionStatus) -> RegistryResponse<()> {
        debug!(%id, %status, "finish: called");
        self.request(|reply| RegistryCommand::Finish {
            id: id.clone(),
            status,
            reply,
        })
        .await?
    }

    /// Mark one session expired immediately, freeing its slot
    pub async fn expire(&self, id: &SessionId) -> RegistryResponse<()> {
        debug!(%id, "expire: called");
        self.request(|reply| RegistryCommand::Expire { id: id.clone(), reply })
            .await?
    }

    /// Cancel an unfinished session, freeing its slot
    ///
    /// The entry stays in the table as `cancelled` until retired or purged.
    pub async fn cancel(&self, id: &SessionId) -> RegistryResponse<SessionReport> {
        debug!(%id, "cancel: called");
        self.request(|reply| RegistryCommand::Cancel { id: id.clone(), reply })
            .await?
    }

    /// Status and processing time of one session
    pub async fn report(&self, id: &SessionId) -> RegistryResponse<SessionReport> {
        debug!(%id, "report: called");
        self.request(|reply| RegistryCommand::Report { id: id.clone(), reply })
            .await?
    }

    /// Remove a session's bookkeeping after its result was delivered
    pub async fn retire(&self, id: &SessionId) -> RegistryResponse<Session> {
        debug!(%id, "retire: called");
        self.request(|reply| RegistryCommand::Retire { id: id.clone(), reply })
            .await?
    }

    /// Expire every unfinished session older than the idle timeout
    pub async fn expire_idle(&self) -> RegistryResponse<Vec<SessionId>> {
        debug!("expire_idle: called");
        self.request(|reply| RegistryCommand::ExpireIdle { reply }).await
    }

    pub async fn stats(&self) -> RegistryResponse<RegistryStats> {
        debug!("stats: called");
        self.request(|reply| RegistryCommand::Stats { reply }).await
    }

    /// Sweep for idle sessions on an interval
    ///
    /// The sweeper holds only a weak sender, so it stops once every
    /// registry handle is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        debug!(?interval, "spawn_sweeper: called");
        let weak = self.tx.downgrade();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tx) = weak.upgrade() else {
                    debug!("spawn_sweeper: registry dropped, stopping");
                    break;
                };
                let registry = SessionRegistry { tx };
                match registry.expire_idle().await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "Sweeper expired idle sessions");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Sweeper could not reach registry, stopping");
                        break;
                    }
                }
            }
        })
    }
}

async fn actor_loop(mut sessions: Sessions, mut rx: mpsc::Receiver<RegistryCommand>) {
    debug!("SessionRegistry actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Admit {
                request,
                preferences,
                reply,
            } => {
                let _ = reply.send(sessions.admit(request, preferences));
            }

            RegistryCommand::Get { id, reply } => {
                let _ = reply.send(sessions.get(&id));
            }

            RegistryCommand::Start { id, reply } => {
                debug!(%id, "actor_loop: Start command");
                let _ = reply.send(sessions.transition(&id, SessionStatus::Running));
            }

            RegistryCommand::Finish { id, status, reply } => {
                debug!(%id, %status, "actor_loop: Finish command");
                let result = match status {
                    SessionStatus::Completed | SessionStatus::Failed => {
                        sessions.transition(&id, status).map(|_| ())
                    }
                    other => Err(RegistryError::InvalidTransition {
                        id: id.clone(),
                        from: sessions.get(&id).map(|s| s.status).unwrap_or(SessionStatus::Running),
                        to: other,
                    }),
                };
                let _ = reply.send(result);
            }

            RegistryCommand::Expire { id, reply } => {
                debug!(%id, "actor_loop: Expire command");
                let result = sessions.transition(&id, SessionStatus::Expired).map(|_| ());
                let _ = reply.send(result);
            }

            RegistryCommand::Cancel { id, reply } => {
                debug!(%id, "actor_loop: Cancel command");
                let _ = reply.send(sessions.cancel(&id, Instant::now()));
            }

            RegistryCommand::Report { id, reply } => {
                let _ = reply.send(sessions.report(&id, Instant::now()));
            }

            RegistryCommand::Retire { id, reply } => {
                let _ = reply.send(sessions.retire(&id));
            }

            RegistryCommand::ExpireIdle { reply } => {
                let _ = reply.send(sessions.expire_idle(Instant::now()));
            }

            RegistryCommand::Stats { reply } => {
                let _ = reply.send(sessions.stats());
            }
        }
    }

    debug!("SessionRegistry actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(max: usize) -> Sessions {
        Sessions::new(max, Duration::from_secs(60))
    }

    #[test]
    fn test_admit_rejects_at_capacity() {
        let mut sessions = table(1);
        let first = sessions.admit("one".into(), Preferences::default()).unwrap();
        assert_eq!(sessions.get(&first).unwrap().status, SessionStatus::Pending);

        let err = sessions.admit("two".into(), Preferences::default()).unwrap_err();
        assert_eq!(err, RegistryError::CapacityExceeded { active: 1, max: 1 });
        assert_eq!(sessions.stats().rejected, 1);
    }

    #[test]
    fn test_finished_sessions_free_their_slot() {
        let mut sessions = table(1);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        sessions.transition(&id, SessionStatus::Running).unwrap();
        sessions.transition(&id, SessionStatus::Completed).unwrap();

        // Not yet retired, but no longer holding a slot
        assert!(sessions.admit("two".into(), Preferences::default()).is_ok());
        assert_eq!(sessions.stats().completed, 1);
    }

    #[test]
    fn test_transitions_follow_lifecycle() {
        let mut sessions = table(2);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();

        let err = sessions.transition(&id, SessionStatus::Completed).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        sessions.transition(&id, SessionStatus::Running).unwrap();
        let err = sessions.transition(&id, SessionStatus::Running).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_expire_idle_marks_overdue_and_frees_slot() {
        let mut sessions = table(1);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        sessions.transition(&id, SessionStatus::Running).unwrap();

        assert!(sessions.expire_idle(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(sessions.expire_idle(later), vec![id.clone()]);
        assert_eq!(sessions.get(&id).unwrap().status, SessionStatus::Expired);
        assert_eq!(
            sessions.transition(&id, SessionStatus::Completed).unwrap_err(),
            RegistryError::Expired(id.clone())
        );
        assert!(sessions.admit("two".into(), Preferences::default()).is_ok());
        assert_eq!(sessions.stats().expired, 1);
    }

    #[test]
    fn test_expire_idle_purges_unretired_finished_entries() {
        let mut sessions = table(2);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        sessions.transition(&id, SessionStatus::Running).unwrap();
        sessions.transition(&id, SessionStatus::Failed).unwrap();

        sessions.expire_idle(Instant::now() + Duration::from_secs(120));
        assert!(matches!(sessions.get(&id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_expired_entry_survives_the_sweep_that_expired_it() {
        let mut sessions = table(1);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();

        let sweep = Instant::now() + Duration::from_secs(600);
        assert_eq!(sessions.expire_idle(sweep), vec![id.clone()]);
        let report = sessions.report(&id, sweep).unwrap();
        assert_eq!(report.session.status, SessionStatus::Expired);

        // Purged one full timeout after the sweep that expired it
        sessions.expire_idle(sweep + Duration::from_secs(61));
        assert!(matches!(sessions.get(&id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_cancel_frees_slot_and_keeps_audit_entry() {
        let mut sessions = table(1);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        sessions.transition(&id, SessionStatus::Running).unwrap();

        let report = sessions.cancel(&id, Instant::now()).unwrap();
        assert_eq!(report.session.status, SessionStatus::Cancelled);
        assert_eq!(sessions.get(&id).unwrap().status, SessionStatus::Cancelled);
        assert!(sessions.admit("two".into(), Preferences::default()).is_ok());

        assert_eq!(
            sessions.transition(&id, SessionStatus::Completed).unwrap_err(),
            RegistryError::Cancelled(id.clone())
        );
        assert_eq!(
            sessions.cancel(&id, Instant::now()).unwrap_err(),
            RegistryError::Cancelled(id.clone())
        );
        assert_eq!(sessions.stats().cancelled, 1);
    }

    #[test]
    fn test_cancel_finished_session_is_rejected() {
        let mut sessions = table(1);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        sessions.transition(&id, SessionStatus::Running).unwrap();
        sessions.transition(&id, SessionStatus::Completed).unwrap();

        let err = sessions.cancel(&id, Instant::now()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(sessions.stats().cancelled, 0);
    }

    #[test]
    fn test_report_measures_processing_time() {
        let mut sessions = table(2);
        let id = sessions.admit("one".into(), Preferences::default()).unwrap();
        let admitted = sessions.entries[&id].admitted_at;

        let running = sessions.report(&id, admitted + Duration::from_secs(3)).unwrap();
        assert_eq!(running.processing_secs, 3.0);

        sessions
            .transition_at(&id, SessionStatus::Running, admitted + Duration::from_secs(1))
            .unwrap();
        sessions
            .transition_at(&id, SessionStatus::Completed, admitted + Duration::from_secs(4))
            .unwrap();
        // Frozen at finish
        let done = sessions.report(&id, admitted + Duration::from_secs(30)).unwrap();
        assert_eq!(done.processing_secs, 4.0);
    }

    #[test]
    fn test_stats_success_rate_and_average_processing() {
        let mut sessions = table(4);
        let ok = sessions.admit("a".into(), Preferences::default()).unwrap();
        let bad = sessions.admit("b".into(), Preferences::default()).unwrap();
        let _idle = sessions.admit("c".into(), Preferences::default()).unwrap();
        assert_eq!(sessions.stats().success_rate, 0.0);

        let base = sessions.entries[&ok].admitted_at;
        sessions.transition(&ok, SessionStatus::Running).unwrap();
        sessions
            .transition_at(&ok, SessionStatus::Completed, base + Duration::from_secs(2))
            .unwrap();
        let base = sessions.entries[&bad].admitted_at;
        sessions.transition(&bad, SessionStatus::Running).unwrap();
        sessions
            .transition_at(&bad, SessionStatus::Failed, base + Duration::from_secs(4))
            .unwrap();

        let stats = sessions.stats();
        assert_eq!(stats.finished(), 2);
        assert_eq!(stats.success_rate, 0.5);
        assert!((stats.avg_processing_secs - 3.0).abs() < 1e-6);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.system_status(), "healthy");
    }

    #[test]
    fn test_retire_unknown_is_not_found() {
        let mut sessions = table(1);
        let id = SessionId::from_string("ses-missing");
        assert_eq!(sessions.retire(&id).unwrap_err(), RegistryError::NotFound(id));
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let registry = SessionRegistry::spawn(2, Duration::from_secs(60));
        let id = registry.admit("draw a bookstore", Preferences::default()).await.unwrap();

        let session = registry.start(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.request, "draw a bookstore");

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.running, 1);
        assert_eq!(stats.active(), 1);
        assert_eq!(stats.capacity, 2);

        registry.finish(&id, SessionStatus::Completed).await.unwrap();
        let retired = registry.retire(&id).await.unwrap();
        assert_eq!(retired.status, SessionStatus::Completed);
        assert!(matches!(registry.get(&id).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_finish_rejects_non_terminal_status() {
        let registry = SessionRegistry::spawn(1, Duration::from_secs(60));
        let id = registry.admit("x", Preferences::default()).await.unwrap();
        registry.start(&id).await.unwrap();
        let err = registry.finish(&id, SessionStatus::Pending).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_through_actor() {
        let registry = SessionRegistry::spawn(1, Duration::from_secs(60));
        let id = registry.admit("x", Preferences::default()).await.unwrap();
        registry.start(&id).await.unwrap();

        let report = registry.cancel(&id).await.unwrap();
        assert_eq!(report.session.status, SessionStatus::Cancelled);
        assert!(report.processing_secs >= 0.0);

        let after = registry.report(&id).await.unwrap();
        assert_eq!(after.session.status, SessionStatus::Cancelled);
        assert_eq!(
            registry.finish(&id, SessionStatus::Completed).await.unwrap_err(),
            RegistryError::Cancelled(id.clone())
        );
        assert!(registry.admit("y", Preferences::default()).await.is_ok());

        let missing = SessionId::from_string("ses-missing");
        assert!(matches!(registry.cancel(&missing).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sweeper_expires_idle_sessions() {
        let registry = SessionRegistry::spawn(1, Duration::from_millis(20));
        registry.admit("x", Preferences::default()).await.unwrap();
        let sweeper = registry.spawn_sweeper(Duration::from_millis(10));

        let mut expired = 0;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            expired = registry.stats().await.unwrap().expired;
            if expired > 0 {
                break;
            }
        }
        assert_eq!(expired, 1);

        // The slot is free again
        assert!(registry.admit("y", Preferences::default()).await.is_ok());
        sweeper.abort();
    }
}
