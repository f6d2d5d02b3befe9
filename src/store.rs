use crate::{
    chat::{Message, NewMessage, Session, SessionStats, SessionStatus, StatusFilter},
    entity::{ProfileUpdate, UserProfile},
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&[Session]) + Send + Sync>;

/// In-memory owner of every chat session.
///
/// Mutations are serialized: each one runs to completion, including the
/// delivery of its notification, before the next one starts. Listeners are
/// called synchronously in registration order with a copy of all sessions.
/// They may read from the store but must not mutate it.
///
/// TODO: add a retention policy for closed sessions; nothing is ever evicted
/// and memory grows with every new user.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    dispatch: Mutex<()>,
}

#[derive(Default)]
struct State {
    sessions: Vec<Session>,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_listener(&self, id: u64) {
        self.state().listeners.retain(|(lid, _)| *lid != id);
    }
}

impl State {
    fn find_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }

    fn notification(&self) -> Notification {
        Notification {
            snapshot: self.sessions.clone(),
            listeners: self.listeners.iter().map(|(_, l)| l.clone()).collect(),
        }
    }
}

/// Snapshot plus the listeners to hand it to, taken under the state lock
/// and delivered after it is released.
struct Notification {
    snapshot: Vec<Session>,
    listeners: Vec<Listener>,
}

impl Notification {
    fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.snapshot);
        }
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open session of `user_id`, or starts a new `waiting` one.
    /// A closed session is never reopened.
    pub fn create_session(&self, user_id: &str, profile: UserProfile) -> Session {
        let _serial = self.inner.serialize();
        let (session, notify) = {
            let mut state = self.inner.state();
            if let Some(existing) = state
                .sessions
                .iter()
                .find(|s| s.user_id == user_id && s.status != SessionStatus::Closed)
            {
                return existing.clone();
            }

            let session = Session::new(user_id, profile);
            debug!(session_id = %session.id, user_id, "session created");
            state.sessions.push(session.clone());
            (session, state.notification())
        };
        notify.deliver();
        session
    }

    /// Appends a message to a session. `None` if the session is unknown.
    pub fn add_message(&self, session_id: &str, new: NewMessage) -> Option<Message> {
        let _serial = self.inner.serialize();
        let (message, notify) = {
            let mut state = self.inner.state();
            let message = state.find_mut(session_id)?.append(new);
            (message, state.notification())
        };
        debug!(session_id, message_id = %message.id, sender = %message.sender, "message added");
        notify.deliver();
        Some(message)
    }

    /// Moves a session forward in its lifecycle. Returns `false` when the
    /// session is unknown or the change would move it backwards.
    pub fn update_session_status(&self, session_id: &str, status: SessionStatus) -> bool {
        let _serial = self.inner.serialize();
        let notify = {
            let mut state = self.inner.state();
            let Some(session) = state.find_mut(session_id) else {
                return false;
            };
            if session.status == status {
                return true;
            }
            if !session.status.can_become(status) {
                warn!(session_id, from = %session.status, to = %status, "rejected status change");
                return false;
            }
            session.status = status;
            session.touch();
            state.notification()
        };
        debug!(session_id, %status, "session status changed");
        notify.deliver();
        true
    }

    /// Merges descriptive fields. Status and messages are left alone.
    pub fn update_session_info(&self, session_id: &str, update: ProfileUpdate) -> bool {
        let _serial = self.inner.serialize();
        let notify = {
            let mut state = self.inner.state();
            let Some(session) = state.find_mut(session_id) else {
                return false;
            };
            update.apply(&mut session.profile);
            session.touch();
            state.notification()
        };
        notify.deliver();
        true
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.inner
            .state()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn sessions(&self, filter: StatusFilter) -> Vec<Session> {
        self.inner
            .state()
            .sessions
            .iter()
            .filter(|s| filter.matches(s.status))
            .cloned()
            .collect()
    }

    pub fn messages(&self, session_id: &str) -> Option<Vec<Message>> {
        self.inner
            .state()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .map(|s| s.messages.clone())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::count(&self.inner.state().sessions)
    }

    /// Registers a listener for every future mutation. The listener stays
    /// registered until the returned [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Session]) + Send + Sync + 'static,
    {
        let mut state = self.inner.state();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Some(Arc::downgrade(&self.inner)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state().listeners.len()
    }
}

/// Handle to a store listener.
pub struct Subscription {
    id: u64,
    store: Option<Weak<Inner>>,
}

impl Subscription {
    /// Deregisters the listener. Later calls do nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(inner) = self.store.take().and_then(|weak| weak.upgrade()) {
            inner.remove_listener(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Sender;
    use std::sync::Mutex as StdMutex;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            user_name: name.to_string(),
            ..Default::default()
        }
    }

    fn recorder(store: &SessionStore) -> (Subscription, Arc<StdMutex<Vec<Vec<Session>>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.subscribe(move |sessions| sink.lock().unwrap().push(sessions.to_vec()));
        (sub, seen)
    }

    #[test]
    fn new_session_waits_until_user_speaks() {
        let store = SessionStore::new();
        let session = store.create_session("u1", profile("Ada"));
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.messages.is_empty());

        let msg = store
            .add_message(&session.id, NewMessage::new("hi", Sender::User))
            .unwrap();
        assert_eq!(msg.text, "hi");

        let session = store.get_session(&session.id).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.messages.len(), 1);
        assert!(session.last_activity >= session.created_at);
    }

    #[test]
    fn create_session_is_idempotent_per_user() {
        let store = SessionStore::new();
        let (_sub, seen) = recorder(&store);

        let first = store.create_session("u1", profile("Ada"));
        let second = store.create_session("u1", profile("Someone else"));
        let third = store.create_session("u1", UserProfile::default());

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, third.id);
        assert_eq!(second.profile.user_name, "Ada");
        assert_eq!(store.stats().total, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn closed_session_is_replaced_not_reopened() {
        let store = SessionStore::new();
        let first = store.create_session("u1", profile("Ada"));
        assert!(store.update_session_status(&first.id, SessionStatus::Closed));

        let second = store.create_session("u1", profile("Ada"));
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, SessionStatus::Waiting);
        assert_eq!(
            store.get_session(&first.id).unwrap().status,
            SessionStatus::Closed
        );
        assert_eq!(store.stats().total, 2);
    }

    #[test]
    fn add_message_to_missing_session_changes_nothing() {
        let store = SessionStore::new();
        store.create_session("u1", profile("Ada"));
        let (_sub, seen) = recorder(&store);
        let before = store.sessions(StatusFilter::All);
        let stats = store.stats();

        let result = store.add_message("missing-id", NewMessage::new("hi", Sender::User));

        assert!(result.is_none());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(store.sessions(StatusFilter::All), before);
        assert_eq!(store.stats(), stats);
    }

    #[test]
    fn messages_are_append_only_in_order() {
        let store = SessionStore::new();
        let session = store.create_session("u1", profile("Ada"));
        let mut last_len = 0;
        for (i, sender) in [Sender::User, Sender::Admin, Sender::User, Sender::Admin]
            .into_iter()
            .enumerate()
        {
            store.add_message(&session.id, NewMessage::new(format!("line {i}"), sender));
            let messages = store.messages(&session.id).unwrap();
            assert!(messages.len() > last_len);
            last_len = messages.len();
        }

        let texts: Vec<_> = store
            .messages(&session.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["line 0", "line 1", "line 2", "line 3"]);
    }

    #[test]
    fn status_changes_only_move_forward() {
        let store = SessionStore::new();
        let session = store.create_session("u1", profile("Ada"));
        store.add_message(&session.id, NewMessage::new("hi", Sender::User));

        assert!(!store.update_session_status(&session.id, SessionStatus::Waiting));
        assert!(store.update_session_status(&session.id, SessionStatus::Closed));
        assert!(!store.update_session_status(&session.id, SessionStatus::Active));
        assert!(!store.update_session_status("nope", SessionStatus::Closed));

        // a user message does not revive a closed session
        store.add_message(&session.id, NewMessage::new("still there?", Sender::User));
        assert_eq!(
            store.get_session(&session.id).unwrap().status,
            SessionStatus::Closed
        );
    }

    #[test]
    fn waiting_session_can_be_closed_directly() {
        let store = SessionStore::new();
        let session = store.create_session("u1", profile("Ada"));
        assert!(store.update_session_status(&session.id, SessionStatus::Closed));
        assert_eq!(store.stats().closed, 1);
    }

    #[test]
    fn update_info_merges_profile_only() {
        let store = SessionStore::new();
        let session = store.create_session("u1", profile("Ada"));
        store.add_message(&session.id, NewMessage::new("hi", Sender::User));

        let changed = store.update_session_info(
            &session.id,
            ProfileUpdate {
                country_code: Some("FR".into()),
                country_name: Some("France".into()),
                ..Default::default()
            },
        );
        assert!(changed);
        assert!(!store.update_session_info("nope", ProfileUpdate::default()));

        let session = store.get_session(&session.id).unwrap();
        assert_eq!(session.profile.user_name, "Ada");
        assert_eq!(session.profile.country_name.as_deref(), Some("France"));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn listing_filters_by_status() {
        let store = SessionStore::new();
        let a = store.create_session("a", profile("A"));
        store.create_session("b", profile("B"));
        let c = store.create_session("c", profile("C"));
        store.add_message(&a.id, NewMessage::new("hi", Sender::User));
        store.update_session_status(&c.id, SessionStatus::Closed);

        assert_eq!(store.sessions(StatusFilter::All).len(), 3);
        assert_eq!(store.sessions(StatusFilter::Active)[0].id, a.id);
        assert_eq!(store.sessions(StatusFilter::Waiting)[0].user_id, "b");
        assert_eq!(store.sessions(StatusFilter::Closed)[0].id, c.id);
        assert_eq!(
            store.stats(),
            SessionStats {
                total: 3,
                waiting: 1,
                active: 1,
                closed: 1
            }
        );
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let store = SessionStore::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        let _a = store.subscribe(move |_| first.lock().unwrap().push("first"));
        let _b = store.subscribe(move |_| second.lock().unwrap().push("second"));

        store.create_session("u1", profile("Ada"));

        assert_eq!(*order.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn snapshot_copies_do_not_leak_into_store() {
        let store = SessionStore::new();
        let (_rec, seen) = recorder(&store);
        let session = store.create_session("u1", profile("Ada"));

        let mut snapshot = seen.lock().unwrap()[0].clone();
        snapshot[0].status = SessionStatus::Closed;
        snapshot[0].messages.push(Message {
            id: "forged".into(),
            text: "forged".into(),
            sender: Sender::Admin,
            timestamp: chrono::Utc::now(),
            status: Default::default(),
        });

        let mut read = store.get_session(&session.id).unwrap();
        read.profile.user_name = "Mallory".into();

        let stored = store.get_session(&session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Waiting);
        assert!(stored.messages.is_empty());
        assert_eq!(stored.profile.user_name, "Ada");
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let store = SessionStore::new();
        let (mut sub, seen) = recorder(&store);
        let (_other, _) = recorder(&store);
        assert_eq!(store.subscriber_count(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.create_session("u1", profile("Ada"));
        assert!(seen.lock().unwrap().is_empty());

        drop(sub);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let store = SessionStore::new();
        {
            let (_sub, _) = recorder(&store);
            assert_eq!(store.subscriber_count(), 1);
        }
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn listener_may_read_store_during_notification() {
        let store = SessionStore::new();
        let reader = store.clone();
        let totals = Arc::new(StdMutex::new(Vec::new()));
        let sink = totals.clone();
        let _sub = store.subscribe(move |sessions| {
            sink.lock().unwrap().push((sessions.len(), reader.stats().total));
        });

        store.create_session("u1", profile("Ada"));
        store.create_session("u2", profile("Bob"));

        assert_eq!(*totals.lock().unwrap(), [(1, 1), (2, 2)]);
    }
}
