//! Login session bootstrap.
//!
//! A successful login stores a snapshot of the account in its own slot.
//! Commands that need to know who is acting (removal protection, the
//! default target of a password change) read it back from here; user
//! records themselves are only ever touched through the user store.

use serde::{Deserialize, Serialize};

use crate::storage::SlotStore;
use crate::ui::prelude::*;
use crate::users::{UserRecord, UserStore, now_millis};

pub const SESSION_SLOT: &str = "session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    #[serde(rename = "primeiro_acesso")]
    pub must_change_password: bool,
    pub logged_in_at: i64,
}

impl Session {
    fn from_user(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            must_change_password: user.must_change_password,
            logged_in_at: now_millis(),
        }
    }
}

pub fn current_session<S: SlotStore>(slots: &S) -> Option<Session> {
    let data = slots.get(SESSION_SLOT)?;
    if data.trim().is_empty() || data == "null" {
        return None;
    }
    match serde_json::from_str(&data) {
        Ok(session) => Some(session),
        Err(e) => {
            emit(
                Level::Warn,
                "auth.session.corrupt",
                &format!("stored session is unreadable, ignoring it: {e}"),
                None,
            );
            None
        }
    }
}

pub fn login<S: SlotStore>(slots: &S, email: &str, password: &str) -> bool {
    let store = UserStore::new(slots);
    let Some(user) = store.authenticate(email, password) else {
        return false;
    };

    let session = Session::from_user(&user);
    let payload = match serde_json::to_string(&session) {
        Ok(payload) => payload,
        Err(e) => {
            emit(
                Level::Error,
                "auth.login.serialize",
                &format!("serializing session: {e}"),
                None,
            );
            return false;
        }
    };
    if !slots.set(SESSION_SLOT, &payload) {
        return false;
    }

    emit(
        Level::Success,
        "auth.login",
        &format!("logged in as {} ({})", user.name, user.id),
        None,
    );
    if user.must_change_password {
        emit(
            Level::Warn,
            "auth.login.must_change",
            "a password change is required; run 'users passwd'",
            None,
        );
    }
    true
}

pub fn logout<S: SlotStore>(slots: &S) -> bool {
    if current_session(slots).is_none() {
        emit(Level::Info, "auth.logout.none", "no active session", None);
        return true;
    }
    let cleared = slots.set(SESSION_SLOT, "null");
    if cleared {
        emit(Level::Success, "auth.logout", "logged out", None);
    }
    cleared
}

pub fn whoami<S: SlotStore>(slots: &S) -> bool {
    match current_session(slots) {
        Some(session) => {
            let role = if session.is_admin {
                ", administrator"
            } else {
                ""
            };
            emit(
                Level::Info,
                "auth.whoami",
                &format!(
                    "{} <{}> ({}{})",
                    session.name, session.email, session.id, role
                ),
                Some(serde_json::json!({ "id": session.id })),
            );
            true
        }
        None => {
            emit(Level::Info, "auth.whoami.none", "not logged in", None);
            false
        }
    }
}

/// Rewrite the session snapshot from the account's current record, so a
/// password change or profile edit is reflected immediately.
pub fn refresh_session<S: SlotStore>(slots: &S) -> bool {
    let Some(session) = current_session(slots) else {
        return true;
    };
    let store = UserStore::new(slots);
    match store.find_by_id(&session.id) {
        Some(user) => {
            let mut refreshed = Session::from_user(&user);
            refreshed.logged_in_at = session.logged_in_at;
            match serde_json::to_string(&refreshed) {
                Ok(payload) => slots.set(SESSION_SLOT, &payload),
                Err(_) => false,
            }
        }
        // the account is gone; drop the stale session
        None => slots.set(SESSION_SLOT, "null"),
    }
}
