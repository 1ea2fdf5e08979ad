//! The fellowship coordinator.
//!
//! One task owns the [`GroupTable`] and every [`Member`] in it. Callers reach
//! it only through a [`FellowshipHandle`], which turns `deliver` and `fetch`
//! calls into [`Request`]s on an unbounded queue. The task handles them one
//! at a time, so no lock guards the state.
//!
//! A fetch with nothing to report is parked on its member as a
//! [`PendingFetch`] and answered later, when a deliver wakes it, when the
//! member expires, or when the coordinator shuts down.

use std::time::Duration;

use actix_web::http::StatusCode;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::models::update::{Group, Inbox, Session, Update};
use crate::services::group_table::{FellowshipStats, GroupTable};
use crate::services::member::{FetchId, FetchReply, Member, PendingFetch};
use crate::services::metrics::Metrics;
use crate::services::session_token::new_session_token;

#[derive(Debug, thiserror::Error)]
pub enum FellowshipError {
    #[error("unable to generate session token: {0}")]
    Randomness(#[from] rand::Error),

    #[error("fellowship is shutting down")]
    ShutdownInProgress,

    #[error("session {session} expired")]
    Expired { session: Session },

    #[error("coordinator stopped without replying")]
    CoordinatorGone,
}

impl actix_web::ResponseError for FellowshipError {
    fn status_code(&self) -> StatusCode {
        match self {
            FellowshipError::Randomness(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FellowshipError::ShutdownInProgress | FellowshipError::CoordinatorGone => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FellowshipError::Expired { .. } => StatusCode::GONE,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Idle time after which a member is removed.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

struct FetchRequest {
    id: FetchId,
    group: Group,
    identity: String,
    session: Session,
    reply: FetchReply,
}

enum Request {
    Deliver {
        group: Group,
        from: Session,
        to: Session,
        message: String,
    },
    Fetch(FetchRequest),
    Cancel {
        id: FetchId,
        group: Group,
        session: Session,
    },
    /// An update that reached its ticket after the caller stopped waiting.
    Restore {
        id: FetchId,
        group: Group,
        session: Session,
        messages: Inbox,
    },
    Stats {
        reply: oneshot::Sender<FellowshipStats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct Coordinator {
    table: GroupTable,
    config: CoordinatorConfig,
    request_rx: mpsc::UnboundedReceiver<Request>,
    metrics: Metrics,
    rng: Box<dyn RngCore + Send>,
}

impl Coordinator {
    fn new(
        config: CoordinatorConfig,
        request_rx: mpsc::UnboundedReceiver<Request>,
        metrics: Metrics,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            table: GroupTable::new(),
            config,
            request_rx,
            metrics,
            rng,
        }
    }

    /// Runs until shutdown is requested or every handle is dropped.
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        info!(
            "Fellowship coordinator started (ttl {:?}, sweep every {:?})",
            self.config.session_ttl, self.config.sweep_interval
        );

        let mut shutdown_waiters = Vec::new();
        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(Request::Shutdown { done }) => {
                        shutdown_waiters.push(done);
                        break;
                    }
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        self.drain(&mut shutdown_waiters).await;
        for done in shutdown_waiters {
            let _ = done.send(());
        }
        info!("Fellowship coordinator stopped");
    }

    /// Stop accepting requests, finish the ones already queued, then fail
    /// every fetch still parked.
    async fn drain(&mut self, shutdown_waiters: &mut Vec<oneshot::Sender<()>>) {
        self.request_rx.close();
        while let Some(request) = self.request_rx.recv().await {
            match request {
                Request::Shutdown { done } => shutdown_waiters.push(done),
                request => self.handle_request(request),
            }
        }

        let waiters = self.table.take_all_waiters();
        if !waiters.is_empty() {
            info!("Releasing {} pending fetches for shutdown", waiters.len());
        }
        for waiter in waiters {
            let _ = waiter.reply.send(Err(FellowshipError::ShutdownInProgress));
        }
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Deliver {
                group,
                from,
                to,
                message,
            } => self.handle_deliver(group, from, to, message),
            Request::Fetch(fetch) => self.handle_fetch(fetch),
            Request::Cancel { id, group, session } => self.handle_cancel(id, &group, &session),
            Request::Restore {
                id,
                group,
                session,
                messages,
            } => self.handle_restore(id, &group, &session, messages),
            Request::Stats { reply } => {
                let _ = reply.send(self.table.stats());
            }
            Request::Shutdown { .. } => unreachable!("shutdown is handled by the run loop"),
        }
    }

    fn handle_deliver(&mut self, group: Group, from: Session, to: Session, message: String) {
        let Some(member) = self.table.member_mut(&group, &to) else {
            debug!(
                "Dropping message for unknown session {} in group {} (from {})",
                to, group, from
            );
            self.metrics.increment_stale_deliveries();
            return;
        };

        member.push_message(from, message);
        self.metrics.increment_deliveries();
        self.wake_one(&group, &to);
    }

    /// Answer the oldest live waiter of `session`, if any. A waiter whose
    /// caller has gone leaves the inbox untouched and the next one is tried.
    fn wake_one(&mut self, group: &str, session: &str) {
        loop {
            let Some(waiter) = self
                .table
                .member_mut(group, session)
                .and_then(Member::pop_waiter)
            else {
                return;
            };
            if self.reply(group, session, waiter) {
                return;
            }
        }
    }

    fn handle_fetch(&mut self, request: FetchRequest) {
        let FetchRequest {
            id,
            group,
            identity,
            session,
            reply,
        } = request;
        let now = Instant::now();
        self.metrics.increment_fetches();

        let members = self.table.group_mut(&group);
        let (session, baseline) = match members.get_mut(&session) {
            Some(member) if !session.is_empty() => {
                let baseline = member.begin_fetch(id, now);
                (session, Some(baseline))
            }
            _ => {
                let token = match new_session_token(self.rng.as_mut()) {
                    Ok(token) => token,
                    Err(err) => {
                        error!("Session token generation failed in group {}: {}", group, err);
                        self.metrics.increment_errors();
                        let _ = reply.send(Err(FellowshipError::Randomness(err)));
                        return;
                    }
                };
                info!("New session {} ({}) joined group {}", token, identity, group);
                members.insert(token.clone(), Member::new(identity, now, id));
                self.metrics.increment_sessions_created();
                (token, None)
            }
        };

        let waiter = PendingFetch { id, baseline, reply };
        let answer_now = baseline.is_none()
            || self
                .table
                .member_mut(&group, &session)
                .is_some_and(|member| member.has_messages());

        if answer_now {
            self.reply(&group, &session, waiter);
        } else if let Some(member) = self.table.member_mut(&group, &session) {
            debug!("Parking fetch {} for session {} in group {}", id, session, group);
            member.defer(waiter);
            self.metrics.increment_deferred();
        }
    }

    /// Build the update for `waiter` from the member's current state and send
    /// it. Returns `false`, with the inbox and baseline restored, when nobody
    /// is listening.
    fn reply(&mut self, group: &str, session: &str, waiter: PendingFetch) -> bool {
        let members = self.table.members_since(group, session, waiter.baseline);
        let Some(member) = self.table.member_mut(group, session) else {
            return false;
        };

        let update = Update {
            session: session.to_string(),
            members,
            messages: member.take_inbox(),
        };

        let id = waiter.id;
        match waiter.reply.send(Ok(update)) {
            Ok(()) => true,
            Err(returned) => {
                debug!("Fetch {} for session {} was abandoned", id, session);
                if let Ok(update) = returned {
                    member.restore_inbox(update.messages);
                }
                member.forget(id);
                false
            }
        }
    }

    fn handle_cancel(&mut self, id: FetchId, group: &str, session: &str) {
        let cancelled = self
            .table
            .member_mut(group, session)
            .and_then(|member| member.cancel(id));
        if cancelled.is_some() {
            debug!("Cancelled fetch {} for session {} in group {}", id, session, group);
            self.metrics.increment_cancelled();
        }
    }

    /// Take back an update whose caller gave up just after it was sent.
    fn handle_restore(&mut self, id: FetchId, group: &str, session: &str, messages: Inbox) {
        let Some(member) = self.table.member_mut(group, session) else {
            debug!(
                "Discarding returned update for departed session {} in group {}",
                session, group
            );
            return;
        };

        debug!("Fetch {} for session {} returned its update unread", id, session);
        member.restore_inbox(messages);
        member.forget(id);
        self.metrics.increment_cancelled();
        if member.has_messages() {
            self.wake_one(group, session);
        }
    }

    fn sweep(&mut self, now: Instant) {
        let expired = self.table.remove_idle(now, self.config.session_ttl);
        if expired.is_empty() {
            return;
        }

        self.metrics.add_sessions_expired(expired.len() as u64);
        for (group, session, mut member) in expired {
            info!(
                "Session {} ({}) in group {} expired",
                session,
                member.identity(),
                group
            );
            for waiter in member.take_waiters() {
                let _ = waiter.reply.send(Err(FellowshipError::Expired {
                    session: session.clone(),
                }));
            }
        }
    }
}

/// Cloneable entry point to a running coordinator.
#[derive(Clone)]
pub struct FellowshipHandle {
    request_tx: mpsc::UnboundedSender<Request>,
    metrics: Metrics,
}

impl FellowshipHandle {
    /// Spawn the coordinator task on the current tokio runtime.
    pub fn spawn(config: CoordinatorConfig, metrics: Metrics) -> Self {
        Self::spawn_with_rng(config, metrics, Box::new(OsRng))
    }

    /// Like [`FellowshipHandle::spawn`], drawing session tokens from `rng`.
    pub fn spawn_with_rng(
        config: CoordinatorConfig,
        metrics: Metrics,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(Coordinator::new(config, request_rx, metrics.clone(), rng).run());
        Self {
            request_tx,
            metrics,
        }
    }

    fn send(&self, request: Request) -> Result<(), FellowshipError> {
        self.request_tx
            .send(request)
            .map_err(|_| FellowshipError::ShutdownInProgress)
    }

    /// Queue `message` for session `to`. Returns once the request is queued;
    /// an unknown recipient is silently ignored.
    pub fn deliver(
        &self,
        group: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), FellowshipError> {
        self.send(Request::Deliver {
            group: group.into(),
            from: from.into(),
            to: to.into(),
            message: message.into(),
        })
    }

    /// Queue a fetch and return a ticket for its eventual update.
    ///
    /// The request is ordered against any call made after this returns.
    /// Dropping the ticket before it resolves cancels the fetch.
    pub fn begin_fetch(
        &self,
        group: impl Into<String>,
        identity: impl Into<String>,
        session: impl Into<String>,
    ) -> Result<FetchTicket, FellowshipError> {
        let (reply, reply_rx) = oneshot::channel();
        let id = FetchId::new();
        let group = group.into();
        let session = session.into();

        self.send(Request::Fetch(FetchRequest {
            id,
            group: group.clone(),
            identity: identity.into(),
            session: session.clone(),
            reply,
        }))?;

        Ok(FetchTicket {
            id,
            group,
            session,
            reply: reply_rx,
            request_tx: self.request_tx.clone(),
            metrics: self.metrics.clone(),
            started_at: Instant::now(),
            settled: false,
        })
    }

    /// Fetch new messages and members for `session`, waiting until there is
    /// something to report. An empty or unknown session starts a new one.
    pub async fn fetch(
        &self,
        group: impl Into<String>,
        identity: impl Into<String>,
        session: impl Into<String>,
    ) -> Result<Update, FellowshipError> {
        self.begin_fetch(group, identity, session)?.wait().await
    }

    pub async fn stats(&self) -> Result<FellowshipStats, FellowshipError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(Request::Stats { reply })?;
        reply_rx.await.map_err(|_| FellowshipError::CoordinatorGone)
    }

    /// Drain queued requests, fail parked fetches and stop the coordinator.
    /// Later calls on any handle fail with `ShutdownInProgress`.
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.send(Request::Shutdown { done }).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// A queued fetch. Dropping it unresolved cancels the fetch, and hands back
/// any update that arrived after the caller stopped waiting.
pub struct FetchTicket {
    id: FetchId,
    group: Group,
    session: Session,
    reply: oneshot::Receiver<Result<Update, FellowshipError>>,
    request_tx: mpsc::UnboundedSender<Request>,
    metrics: Metrics,
    started_at: Instant,
    settled: bool,
}

impl FetchTicket {
    pub async fn wait(mut self) -> Result<Update, FellowshipError> {
        let result = match (&mut self.reply).await {
            Ok(result) => result,
            Err(_) => Err(FellowshipError::CoordinatorGone),
        };
        self.settled = true;

        if let Err(err) = &result {
            debug!("Fetch {} for group {} failed: {}", self.id, self.group, err);
        }
        self.metrics
            .record_fetch_wait(self.started_at.elapsed().as_secs_f64())
            .await;
        result
    }
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.reply.close();
        let group = std::mem::take(&mut self.group);
        let request = match self.reply.try_recv() {
            Ok(Ok(update)) => Request::Restore {
                id: self.id,
                group,
                session: update.session,
                messages: update.messages,
            },
            _ => Request::Cancel {
                id: self.id,
                group,
                session: std::mem::take(&mut self.session),
            },
        };
        let _ = self.request_tx.send(request);
    }
}
