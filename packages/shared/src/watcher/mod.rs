//! Client-side session watcher.
//!
//! A watcher follows one host's open session on behalf of one viewer. It keeps
//! a local one-second countdown against the stored deadline, re-reads
//! authoritative state whenever the fan-out reports a change it cares about,
//! and, when the viewer takes part in the session, asks the coordinator to
//! move the session on once the countdown hits zero. The countdown is
//! advisory: every transition it triggers is idempotent on the server.

pub mod gateway;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

use crate::clock::{format_timer, remaining_seconds, Clock};
use crate::fanout::{ChangeFeed, RowChange, RowTopic};
use crate::models::invite::SessionInvite;
use crate::models::live_session::{LiveSession, SessionStatus};
use crate::models::participant::SessionParticipant;

pub use gateway::SessionGateway;

pub const WATCHER_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherPhase {
    /// No open session for the watched host.
    Idle,
    /// Following a session whose countdown is not running.
    Watching,
    /// Following a session with a live countdown.
    Counting,
}

/// Everything a client renders, published after every refresh and tick.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherView {
    pub phase: WatcherPhase,
    pub session: Option<LiveSession>,
    pub participants: Vec<SessionParticipant>,
    pub pending_invites: Vec<SessionInvite>,
    pub remaining_seconds: u64,
    pub is_participant: bool,
    pub room_name: Option<String>,
    pub last_error: Option<String>,
}

impl WatcherView {
    fn idle() -> Self {
        WatcherView {
            phase: WatcherPhase::Idle,
            session: None,
            participants: Vec::new(),
            pending_invites: Vec::new(),
            remaining_seconds: 0,
            is_participant: false,
            room_name: None,
            last_error: None,
        }
    }

    pub fn timer_label(&self) -> String {
        format_timer(self.remaining_seconds)
    }
}

/// Handle to a running watcher task. Dropping it stops the task.
pub struct SessionWatcher {
    view: watch::Receiver<WatcherView>,
    refresh: mpsc::UnboundedSender<()>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionWatcher {
    /// Watches `watch_host_id`'s session as `viewer_id`. When the two differ
    /// and the viewer is not in the session, the watcher is a pure viewer and
    /// never calls a transition.
    pub fn spawn(
        gateway: Arc<dyn SessionGateway>,
        feed: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
        viewer_id: &str,
        watch_host_id: &str,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(WatcherView::idle());
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut ticker = interval_at(Instant::now() + WATCHER_TICK, WATCHER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = WatcherTask {
            gateway,
            feed,
            clock,
            viewer_id: viewer_id.to_string(),
            watch_host_id: watch_host_id.to_string(),
            view_tx,
            streams: StreamMap::new(),
            followed_session: None,
            ticker,
            session: None,
            participants: Vec::new(),
            pending_invites: Vec::new(),
            is_participant: false,
            counting: false,
            last_error: None,
        };

        SessionWatcher {
            view: view_rx,
            refresh: refresh_tx,
            shutdown: Some(shutdown_tx),
            task: Some(tokio::spawn(task.run(shutdown_rx, refresh_rx))),
        }
    }

    /// A host watching their own session.
    pub fn for_host(
        gateway: Arc<dyn SessionGateway>,
        feed: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
        host_id: &str,
    ) -> Self {
        Self::spawn(gateway, feed, clock, host_id, host_id)
    }

    pub fn view(&self) -> WatcherView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherView> {
        self.view.clone()
    }

    /// Drops local predictions and re-reads authoritative state.
    pub fn request_refresh(&self) {
        let _ = self.refresh.send(());
    }

    /// Stops the task and waits for it to release its subscriptions.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session watcher task did not stop cleanly: {}", e);
            }
        }
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct WatcherTask {
    gateway: Arc<dyn SessionGateway>,
    feed: Arc<dyn ChangeFeed>,
    clock: Arc<dyn Clock>,
    viewer_id: String,
    watch_host_id: String,
    view_tx: watch::Sender<WatcherView>,
    streams: StreamMap<RowTopic, BroadcastStream<RowChange>>,
    followed_session: Option<String>,
    ticker: Interval,
    session: Option<LiveSession>,
    participants: Vec<SessionParticipant>,
    pending_invites: Vec<SessionInvite>,
    is_participant: bool,
    counting: bool,
    last_error: Option<String>,
}

impl WatcherTask {
    async fn run(
        mut self,
        mut shutdown: oneshot::Receiver<()>,
        mut refresh: mpsc::UnboundedReceiver<()>,
    ) {
        self.subscribe(RowTopic::InvitesTo(self.viewer_id.clone()));
        self.subscribe(RowTopic::Participation(self.watch_host_id.clone()));
        self.refresh().await;

        loop {
            let counting = self.counting;
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Session watcher for {} shutting down", self.viewer_id);
                    break;
                }
                Some(()) = refresh.recv() => self.refresh().await,
                Some((topic, item)) = self.streams.next() => {
                    if let Err(BroadcastStreamRecvError::Lagged(skipped)) = item {
                        warn!("Watcher for {} missed {} changes on {:?}", self.viewer_id, skipped, topic);
                    }
                    debug!("Change on {:?}, refreshing watcher for {}", topic, self.viewer_id);
                    self.refresh().await;
                }
                _ = self.ticker.tick(), if counting => self.tick().await,
            }
        }
    }

    fn subscribe(&mut self, topic: RowTopic) {
        let receiver = self.feed.subscribe(topic.clone());
        self.streams.insert(topic, BroadcastStream::new(receiver));
    }

    /// Points the session subscription at `session_id`. Returns whether it moved.
    fn follow(&mut self, session_id: Option<&str>) -> bool {
        if self.followed_session.as_deref() == session_id {
            return false;
        }

        if let Some(previous) = self.followed_session.take() {
            self.streams.remove(&RowTopic::Session(previous.clone()));
            debug!("Watcher for {} stopped following {}", self.viewer_id, previous);
        }
        if let Some(session_id) = session_id {
            self.subscribe(RowTopic::Session(session_id.to_string()));
            self.followed_session = Some(session_id.to_string());
            info!(
                "Watcher for {} now following session {} of {}",
                self.viewer_id, session_id, self.watch_host_id
            );
        }
        true
    }

    async fn fetch_session(&mut self) -> Option<Option<LiveSession>> {
        match self
            .gateway
            .active_session_for_host(&self.watch_host_id)
            .await
        {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(
                    "Watcher for {} could not load {}'s session: {}",
                    self.viewer_id, self.watch_host_id, e
                );
                self.last_error = Some(e.to_string());
                None
            }
        }
    }

    async fn refresh(&mut self) {
        self.last_error = None;

        match self.gateway.pending_invites(&self.viewer_id).await {
            Ok(invites) => self.pending_invites = invites,
            Err(e) => {
                warn!("Watcher for {} could not load invites: {}", self.viewer_id, e);
                self.last_error = Some(e.to_string());
            }
        }

        let Some(mut session) = self.fetch_session().await else {
            self.publish();
            return;
        };

        // A change landing between the read and the new subscription would be
        // missed, so read once more after moving the subscription.
        if self.follow(session.as_ref().map(|s| s.session_id.as_str())) && session.is_some() {
            if let Some(reread) = self.fetch_session().await {
                session = reread;
                self.follow(session.as_ref().map(|s| s.session_id.as_str()));
            }
        }

        match session {
            None => {
                self.session = None;
                self.participants.clear();
                self.is_participant = false;
                self.counting = false;
            }
            Some(session) => {
                match self.gateway.session_participants(&session.session_id).await {
                    Ok(participants) => self.participants = participants,
                    Err(e) => {
                        warn!(
                            "Watcher for {} could not load participants of {}: {}",
                            self.viewer_id, session.session_id, e
                        );
                        self.last_error = Some(e.to_string());
                    }
                }

                self.is_participant = session.is_host(&self.viewer_id)
                    || self
                        .participants
                        .iter()
                        .any(|p| p.profile_id == self.viewer_id);

                let remaining = remaining_seconds(session.current_deadline(), self.clock.now());
                // An overdue active session keeps ticking for participants so
                // the transition is retried until it lands.
                self.counting = remaining > 0
                    || (self.is_participant && session.status == SessionStatus::Active);
                self.session = Some(session);
                self.ticker.reset();
            }
        }

        self.publish();
    }

    async fn tick(&mut self) {
        let Some(session) = self.session.clone() else {
            self.counting = false;
            self.publish();
            return;
        };

        let remaining = remaining_seconds(session.current_deadline(), self.clock.now());
        if remaining > 0 {
            self.publish();
            return;
        }

        if !self.is_participant {
            self.counting = false;
            self.publish();
            return;
        }

        match session.status {
            SessionStatus::Active => {
                match self
                    .gateway
                    .transition_to_cooldown(&self.viewer_id, &session.session_id)
                    .await
                {
                    Ok(updated) => {
                        debug!(
                            "Watcher for {} moved session {} to {}",
                            self.viewer_id,
                            updated.session_id,
                            updated.status.as_str()
                        );
                        self.refresh().await;
                    }
                    Err(e) => {
                        warn!(
                            "Watcher for {} could not start cooldown of {}: {}",
                            self.viewer_id, session.session_id, e
                        );
                        self.last_error = Some(e.to_string());
                        self.publish();
                    }
                }
            }
            SessionStatus::Cooldown | SessionStatus::Ended => self.refresh().await,
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> WatcherView {
        let remaining = self
            .session
            .as_ref()
            .map(|session| remaining_seconds(session.current_deadline(), now))
            .unwrap_or(0);
        let phase = match (&self.session, self.counting) {
            (None, _) => WatcherPhase::Idle,
            (Some(_), true) => WatcherPhase::Counting,
            (Some(_), false) => WatcherPhase::Watching,
        };

        WatcherView {
            phase,
            session: self.session.clone(),
            participants: self.participants.clone(),
            pending_invites: self.pending_invites.clone(),
            remaining_seconds: remaining,
            is_participant: self.is_participant,
            room_name: self.session.as_ref().map(LiveSession::room_name),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot(self.clock.now());
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fanout::BroadcastChangeFeed;
    use crate::models::invite::InviteDecision;
    use crate::models::live_session::{EndReason, SessionMode, SessionType};
    use crate::repositories::memory::InMemoryStore;
    use crate::services::session_coordinator::SessionCoordinator;
    use chrono::TimeZone;
    use super::gateway::MockSessionGateway;
    use crate::services::errors::session_coordinator_errors::SessionCoordinatorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
    }

    struct Harness {
        clock: Arc<ManualClock>,
        feed: Arc<BroadcastChangeFeed>,
        coordinator: Arc<SessionCoordinator>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(fixed_now()));
            let feed = Arc::new(BroadcastChangeFeed::default());
            let store = Arc::new(InMemoryStore::with_feed(feed.clone()));
            let coordinator = Arc::new(SessionCoordinator::new(
                store.clone(),
                store,
                clock.clone(),
            ));
            Harness {
                clock,
                feed,
                coordinator,
            }
        }

        fn watch(&self, viewer_id: &str, watch_host_id: &str) -> SessionWatcher {
            SessionWatcher::spawn(
                self.coordinator.clone(),
                self.feed.clone(),
                self.clock.clone(),
                viewer_id,
                watch_host_id,
            )
        }

        async fn start_session(&self) -> String {
            let invite = self
                .coordinator
                .issue_invite("host-a", "host-b", SessionType::Battle, SessionMode::Speed, None)
                .await
                .unwrap();
            self.coordinator
                .respond_to_invite("host-b", &invite.id, InviteDecision::Accepted)
                .await
                .unwrap()
                .session_id
                .unwrap()
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<WatcherView>,
        predicate: impl Fn(&WatcherView) -> bool,
    ) -> WatcherView {
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if predicate(&*view) {
                        return (*view).clone();
                    }
                }
                rx.changed().await.expect("watcher stopped");
            }
        })
        .await
        .expect("watcher never reached the expected view")
    }

    #[tokio::test(start_paused = true)]
    async fn test_participant_moves_session_to_cooldown_at_zero() {
        let harness = Harness::new();
        let session_id = harness.start_session().await;
        let watcher = harness.watch("host-b", "host-b");
        let mut rx = watcher.subscribe();

        let view = wait_for(&mut rx, |v| v.phase == WatcherPhase::Counting).await;
        assert_eq!(view.remaining_seconds, 60);
        assert!(view.is_participant);
        assert_eq!(view.timer_label(), "1:00");
        assert_eq!(view.room_name, Some(format!("battle_{}", session_id)));

        harness.clock.advance(chrono::Duration::seconds(60));

        let view = wait_for(&mut rx, |v| {
            v.session.as_ref().map(|s| s.status) == Some(SessionStatus::Cooldown)
        })
        .await;
        assert_eq!(view.remaining_seconds, 30);
        assert_eq!(view.phase, WatcherPhase::Counting);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_drives_invite_and_session_refresh() {
        let harness = Harness::new();
        let watcher = harness.watch("host-b", "host-b");
        let mut rx = watcher.subscribe();

        let invite = harness
            .coordinator
            .issue_invite("host-a", "host-b", SessionType::Cohost, SessionMode::Marathon, None)
            .await
            .unwrap();
        let view = wait_for(&mut rx, |v| v.pending_invites.len() == 1).await;
        assert_eq!(view.pending_invites[0].id, invite.id);
        assert_eq!(view.phase, WatcherPhase::Idle);

        harness
            .coordinator
            .respond_to_invite("host-b", &invite.id, InviteDecision::Accepted)
            .await
            .unwrap();
        let view = wait_for(&mut rx, |v| v.session.is_some()).await;
        assert!(view.pending_invites.is_empty());
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.remaining_seconds, 180);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_session_returns_watcher_to_idle() {
        let harness = Harness::new();
        let session_id = harness.start_session().await;
        let watcher = harness.watch("host-a", "host-a");
        let mut rx = watcher.subscribe();
        wait_for(&mut rx, |v| v.session.is_some()).await;

        harness
            .coordinator
            .end_session("host-b", &session_id, EndReason::End)
            .await
            .unwrap();

        let view = wait_for(&mut rx, |v| v.phase == WatcherPhase::Idle).await;
        assert!(view.session.is_none());
        assert_eq!(view.remaining_seconds, 0);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_never_requests_transitions() {
        let session = LiveSession::start(
            "host-a",
            "host-b",
            SessionType::Battle,
            SessionMode::Speed,
            None,
            fixed_now() - chrono::Duration::seconds(90),
        );
        let founders = SessionParticipant::founders(&session);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut gateway = MockSessionGateway::new();
        gateway
            .expect_active_session_for_host()
            .returning(move |_| Ok(Some(session.clone())));
        gateway
            .expect_session_participants()
            .returning(move |_| Ok(founders.clone()));
        gateway.expect_pending_invites().returning(|_| Ok(Vec::new()));
        let counter = calls.clone();
        gateway
            .expect_transition_to_cooldown()
            .returning(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SessionCoordinatorError::Unauthorized("viewer".to_string()))
            });

        let watcher = SessionWatcher::spawn(
            Arc::new(gateway),
            Arc::new(BroadcastChangeFeed::default()),
            Arc::new(ManualClock::new(fixed_now())),
            "fan-1",
            "host-a",
        );
        let mut rx = watcher.subscribe();

        let view = wait_for(&mut rx, |v| v.session.is_some()).await;
        assert!(!view.is_participant);
        assert_eq!(view.remaining_seconds, 0);
        assert_eq!(view.phase, WatcherPhase::Watching);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_subscriptions() {
        let harness = Harness::new();
        let session_id = harness.start_session().await;
        let watcher = harness.watch("host-a", "host-a");
        let mut rx = watcher.subscribe();
        wait_for(&mut rx, |v| v.session.is_some()).await;

        let topics = [
            RowTopic::InvitesTo("host-a".to_string()),
            RowTopic::Participation("host-a".to_string()),
            RowTopic::Session(session_id.clone()),
        ];
        for topic in &topics {
            assert_eq!(harness.feed.subscriber_count(topic), 1);
        }

        watcher.shutdown().await;

        for topic in &topics {
            assert_eq!(harness.feed.subscriber_count(topic), 0);
        }
    }
}
