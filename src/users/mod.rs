//! User account store.
//!
//! Several commands (and historically, several independent scripts) read
//! and write the same persisted user list without any coordination. This
//! manager is the single sanctioned path to that data: reads self-heal,
//! and every write validates the list, backs up the previous generation
//! and verifies what actually landed in the slot. Collaborators must
//! never touch the `users` or `users_backup` slots directly.

pub mod commands;
mod integrity;

pub use integrity::IntegrityReport;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::SlotStore;
use crate::ui::prelude::*;

pub const USERS_SLOT: &str = "users";
pub const USERS_BACKUP_SLOT: &str = "users_backup";

/// Reserved id of the built-in administrator. Permanently protected.
pub const ADMIN_ID: &str = "USR-001";
pub const ADMIN_EMAIL: &str = "admin";

const MIN_PASSWORD_LEN: usize = 6;

/// One account entry. Wire names are the legacy Portuguese field names;
/// every field is defaulted so incomplete legacy records still load and
/// can be reported by the integrity checker instead of poisoning the
/// whole payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "senha", default)]
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(rename = "ativo", default)]
    pub active: bool,
    #[serde(rename = "primeiro_acesso", default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl UserRecord {
    /// Whether this record satisfies the administrator condition.
    pub fn is_admin_account(&self) -> bool {
        self.id == ADMIN_ID || self.email == ADMIN_EMAIL
    }

    /// The three identifying fields are present.
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.email.is_empty() && !self.name.is_empty()
    }
}

/// Input for [`UserStore::add`]. A missing id triggers sequential
/// generation; created accounts must change their password on first login.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
    pub active: bool,
}

/// Partial update for [`UserStore::update`]. The id and creation
/// timestamp are not expressible here, which keeps them immutable.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<bool>,
    pub active: Option<bool>,
    pub must_change_password: Option<bool>,
}

/// A record with the password stripped, safe to hand to exports.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    #[serde(rename = "ativo")]
    pub active: bool,
    #[serde(rename = "primeiro_acesso")]
    pub must_change_password: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            active: user.active,
            must_change_password: user.must_change_password,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub total: usize,
    pub active: usize,
    pub admins: usize,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn default_admin() -> UserRecord {
    let now = now_millis();
    UserRecord {
        id: ADMIN_ID.to_string(),
        name: "Administrator".to_string(),
        email: ADMIN_EMAIL.to_string(),
        password: "admin01".to_string(),
        is_admin: true,
        active: true,
        must_change_password: false,
        created_at: now,
        updated_at: now,
    }
}

/// Prepend the default administrator when no record satisfies the
/// administrator condition. Returns true when the list was changed.
pub(crate) fn ensure_admin(users: &mut Vec<UserRecord>) -> bool {
    if users.iter().any(UserRecord::is_admin_account) {
        return false;
    }
    users.insert(0, default_admin());
    true
}

pub(crate) fn active_admins(users: &[UserRecord]) -> usize {
    users.iter().filter(|u| u.is_admin && u.active).count()
}

pub(crate) fn next_id(users: &[UserRecord]) -> String {
    let max = users
        .iter()
        .filter_map(|u| u.id.strip_prefix("USR-"))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("USR-{:03}", max + 1)
}

pub struct UserStore<'a, S: SlotStore> {
    slots: &'a S,
}

impl<'a, S: SlotStore> UserStore<'a, S> {
    pub fn new(slots: &'a S) -> Self {
        Self { slots }
    }

    /// Load the canonical user list. Never fails: a missing slot yields a
    /// freshly seeded list, a corrupt payload falls back to the backup,
    /// and a list without an administrator gets one restored (and the
    /// repair is committed).
    pub fn load(&self) -> Vec<UserRecord> {
        let Some(data) = self.slots.get(USERS_SLOT) else {
            emit(
                Level::Info,
                "users.load.seed",
                "no user data found, starting with the default administrator",
                None,
            );
            return vec![default_admin()];
        };

        let mut users: Vec<UserRecord> = match serde_json::from_str(&data) {
            Ok(users) => users,
            Err(e) => {
                emit(
                    Level::Error,
                    "users.load.corrupt",
                    &format!("user data is corrupted ({e}), recovering from backup"),
                    None,
                );
                return self.load_from_backup();
            }
        };

        if ensure_admin(&mut users) {
            emit(
                Level::Warn,
                "users.load.admin_missing",
                "administrator account was missing, restoring it",
                None,
            );
            self.save(users.clone());
        }

        emit(
            Level::Debug,
            "users.load.ok",
            &format!("{} user(s) loaded", users.len()),
            None,
        );
        users
    }

    /// Recover the user list from the backup slot, committing it back as
    /// the canonical state. Falls back to a freshly seeded list when the
    /// backup is missing, unreadable or empty.
    pub fn load_from_backup(&self) -> Vec<UserRecord> {
        if let Some(data) = self.slots.get(USERS_BACKUP_SLOT) {
            match serde_json::from_str::<Vec<UserRecord>>(&data) {
                Ok(mut users) if !users.is_empty() => {
                    emit(
                        Level::Warn,
                        "users.backup.restore",
                        "restoring user data from backup",
                        None,
                    );
                    ensure_admin(&mut users);
                    self.save(users.clone());
                    return users;
                }
                Ok(_) => {
                    emit(Level::Warn, "users.backup.empty", "backup slot is empty", None);
                }
                Err(e) => {
                    emit(
                        Level::Error,
                        "users.backup.corrupt",
                        &format!("backup is unreadable: {e}"),
                        None,
                    );
                }
            }
        }

        emit(
            Level::Warn,
            "users.backup.seed",
            "no usable backup, starting with the default administrator",
            None,
        );
        vec![default_admin()]
    }

    /// Commit a full user list. The previous slot contents are copied to
    /// the backup slot first, and the write is verified by reading the
    /// slot back; any failure restores the backup and reports false.
    pub fn save(&self, mut users: Vec<UserRecord>) -> bool {
        if users.is_empty() {
            emit(
                Level::Error,
                "users.save.empty",
                "refusing to save an empty user list",
                None,
            );
            return false;
        }

        if ensure_admin(&mut users) {
            emit(
                Level::Warn,
                "users.save.admin_missing",
                "administrator missing from the list, restoring it before saving",
                None,
            );
        }

        let payload = match serde_json::to_string(&users) {
            Ok(payload) => payload,
            Err(e) => {
                emit(
                    Level::Error,
                    "users.save.serialize",
                    &format!("serializing user list: {e}"),
                    None,
                );
                return false;
            }
        };

        if let Some(current) = self.slots.get(USERS_SLOT) {
            if !self.slots.set(USERS_BACKUP_SLOT, &current) {
                emit(
                    Level::Error,
                    "users.save.backup_failed",
                    "could not back up the current user list, aborting save",
                    None,
                );
                return false;
            }
        }

        if !self.slots.set(USERS_SLOT, &payload) {
            self.restore_from_backup();
            return false;
        }

        let verified = self
            .slots
            .get(USERS_SLOT)
            .and_then(|data| serde_json::from_str::<Vec<UserRecord>>(&data).ok())
            .is_some_and(|readback| readback.len() == users.len());
        if !verified {
            emit(
                Level::Error,
                "users.save.verify",
                "read-back after saving did not match, restoring backup",
                None,
            );
            self.restore_from_backup();
            return false;
        }

        emit(
            Level::Debug,
            "users.save.ok",
            &format!("{} user(s) saved", users.len()),
            None,
        );
        true
    }

    fn restore_from_backup(&self) {
        if let Some(backup) = self.slots.get(USERS_BACKUP_SLOT) {
            self.slots.set(USERS_SLOT, &backup);
        }
    }

    pub fn add(&self, new: NewUser) -> bool {
        if new.name.trim().is_empty() || new.email.trim().is_empty() || new.password.is_empty() {
            emit(
                Level::Error,
                "users.add.missing_fields",
                "name, email and password are required",
                None,
            );
            return false;
        }
        if new.password.len() < MIN_PASSWORD_LEN {
            emit(
                Level::Error,
                "users.add.short_password",
                &format!("the password must have at least {MIN_PASSWORD_LEN} characters"),
                None,
            );
            return false;
        }

        let mut users = self.load();
        if users.iter().any(|u| u.email == new.email) {
            emit(
                Level::Error,
                "users.add.duplicate_email",
                &format!("email already registered: {}", new.email),
                None,
            );
            return false;
        }

        let now = now_millis();
        let record = UserRecord {
            id: new.id.unwrap_or_else(|| next_id(&users)),
            name: new.name,
            email: new.email,
            password: new.password,
            is_admin: new.is_admin,
            active: new.active,
            must_change_password: true,
            created_at: now,
            updated_at: now,
        };
        emit(
            Level::Debug,
            "users.add",
            &format!("adding user {}", record.id),
            None,
        );
        users.push(record);
        self.save(users)
    }

    pub fn update(&self, id: &str, patch: &UserPatch) -> bool {
        let mut users = self.load();
        let Some(index) = users.iter().position(|u| u.id == id) else {
            emit(
                Level::Error,
                "users.update.not_found",
                &format!("user not found: {id}"),
                None,
            );
            return false;
        };

        if let Some(email) = &patch.email {
            let taken = users
                .iter()
                .enumerate()
                .any(|(i, u)| i != index && &u.email == email);
            if taken {
                emit(
                    Level::Error,
                    "users.update.duplicate_email",
                    &format!("email already registered: {email}"),
                    None,
                );
                return false;
            }
        }

        let user = &mut users[index];
        if let Some(name) = &patch.name {
            user.name = name.clone();
        }
        if let Some(email) = &patch.email {
            user.email = email.clone();
        }
        if let Some(password) = &patch.password {
            user.password = password.clone();
        }
        if let Some(is_admin) = patch.is_admin {
            user.is_admin = is_admin;
        }
        if let Some(active) = patch.active {
            user.active = active;
        }
        if let Some(flag) = patch.must_change_password {
            user.must_change_password = flag;
        }
        user.updated_at = now_millis();

        self.save(users)
    }

    /// Remove an account. The reserved administrator id, the caller's own
    /// account and the last active administrator are all refused.
    pub fn remove(&self, id: &str, current_user: Option<&str>) -> bool {
        if id == ADMIN_ID {
            emit(
                Level::Error,
                "users.remove.protected",
                "the built-in administrator cannot be removed",
                None,
            );
            return false;
        }
        if current_user == Some(id) {
            emit(
                Level::Error,
                "users.remove.self",
                "you cannot remove your own account",
                None,
            );
            return false;
        }

        let users = self.load();
        let Some(target) = users.iter().find(|u| u.id == id) else {
            emit(
                Level::Error,
                "users.remove.not_found",
                &format!("user not found: {id}"),
                None,
            );
            return false;
        };
        if target.is_admin && target.active && active_admins(&users) <= 1 {
            emit(
                Level::Error,
                "users.remove.last_admin",
                "cannot remove the last active administrator",
                None,
            );
            return false;
        }

        let remaining: Vec<UserRecord> = users.into_iter().filter(|u| u.id != id).collect();
        self.save(remaining)
    }

    pub fn find_by_id(&self, id: &str) -> Option<UserRecord> {
        self.load().into_iter().find(|u| u.id == id)
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.load().into_iter().find(|u| u.email == email)
    }

    pub fn get_all(&self) -> Vec<UserRecord> {
        self.load()
    }

    pub fn count(&self) -> UserCounts {
        let users = self.load();
        UserCounts {
            total: users.len(),
            active: users.iter().filter(|u| u.active).count(),
            admins: active_admins(&users),
        }
    }

    pub fn export(&self) -> Vec<PublicUser> {
        self.load().iter().map(PublicUser::from).collect()
    }

    /// Self-service password change: requires the current password.
    pub fn change_password(&self, id: &str, current: &str, new: &str) -> bool {
        let Some(user) = self.find_by_id(id) else {
            emit(
                Level::Error,
                "users.passwd.not_found",
                &format!("user not found: {id}"),
                None,
            );
            return false;
        };
        if user.password != current {
            emit(
                Level::Error,
                "users.passwd.wrong_password",
                "the current password is incorrect",
                None,
            );
            return false;
        }
        if new.len() < MIN_PASSWORD_LEN {
            emit(
                Level::Error,
                "users.passwd.short_password",
                &format!("the new password must have at least {MIN_PASSWORD_LEN} characters"),
                None,
            );
            return false;
        }
        if new == current {
            emit(
                Level::Error,
                "users.passwd.unchanged",
                "the new password must differ from the current one",
                None,
            );
            return false;
        }

        self.update(
            id,
            &UserPatch {
                password: Some(new.to_string()),
                must_change_password: Some(false),
                ..Default::default()
            },
        )
    }

    /// Administrative reset: the account must pick a new password on the
    /// next login.
    pub fn reset_password(&self, id: &str, new: &str) -> bool {
        if new.len() < MIN_PASSWORD_LEN {
            emit(
                Level::Error,
                "users.reset.short_password",
                &format!("the new password must have at least {MIN_PASSWORD_LEN} characters"),
                None,
            );
            return false;
        }
        if self.find_by_id(id).is_none() {
            emit(
                Level::Error,
                "users.reset.not_found",
                &format!("user not found: {id}"),
                None,
            );
            return false;
        }

        self.update(
            id,
            &UserPatch {
                password: Some(new.to_string()),
                must_change_password: Some(true),
                ..Default::default()
            },
        )
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Option<UserRecord> {
        let Some(user) = self.find_by_email(email) else {
            emit(
                Level::Error,
                "users.auth.unknown",
                &format!("no account registered for {email}"),
                None,
            );
            return None;
        };
        if !user.active {
            emit(
                Level::Error,
                "users.auth.inactive",
                "this account is deactivated",
                None,
            );
            return None;
        }
        if user.password != password {
            emit(Level::Error, "users.auth.wrong_password", "incorrect password", None);
            return None;
        }
        Some(user)
    }
}
