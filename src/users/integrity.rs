//! Integrity checking and repair for the user collection.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::storage::SlotStore;
use crate::ui::prelude::*;

use super::{UserRecord, UserStore, default_admin};

/// Placeholder listed for records that lost their id entirely.
const MISSING_ID: &str = "missing-id";

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub total: usize,
    pub admin_exists: bool,
    /// Each duplicated email appears once, regardless of how many
    /// records share it.
    pub duplicated_emails: Vec<String>,
    /// Ids of records missing id, email or name.
    pub invalid_records: Vec<String>,
    pub ok: bool,
}

impl<'a, S: SlotStore> UserStore<'a, S> {
    pub fn check_integrity(&self) -> IntegrityReport {
        let users = self.load();

        let mut seen = BTreeSet::new();
        let mut duplicated_emails = Vec::new();
        for user in &users {
            if !seen.insert(user.email.clone()) && !duplicated_emails.contains(&user.email) {
                duplicated_emails.push(user.email.clone());
            }
        }

        let invalid_records: Vec<String> = users
            .iter()
            .filter(|u| !u.is_well_formed())
            .map(|u| {
                if u.id.is_empty() {
                    MISSING_ID.to_string()
                } else {
                    u.id.clone()
                }
            })
            .collect();

        let admin_exists = users.iter().any(UserRecord::is_admin_account);
        let ok = admin_exists && duplicated_emails.is_empty() && invalid_records.is_empty();

        IntegrityReport {
            total: users.len(),
            admin_exists,
            duplicated_emails,
            invalid_records,
            ok,
        }
    }

    /// Bring the collection back to a consistent state: restore the
    /// administrator, drop later duplicates of a shared email (the first
    /// occurrence in sequence order survives) and drop malformed records
    /// unless they carry the reserved administrator identity. Does not
    /// write anything when the collection is already consistent.
    pub fn repair(&self) -> bool {
        let report = self.check_integrity();
        if report.ok {
            emit(
                Level::Debug,
                "users.repair.clean",
                "user data is consistent, nothing to repair",
                None,
            );
            return true;
        }

        emit(Level::Warn, "users.repair.start", "repairing user data", None);
        let mut users = self.load();

        if !report.admin_exists {
            users.insert(0, default_admin());
        }

        if !report.duplicated_emails.is_empty() {
            let mut seen = BTreeSet::new();
            users.retain(|u| seen.insert(u.email.clone()));
        }

        users.retain(|u| u.is_admin_account() || u.is_well_formed());

        let saved = self.save(users);
        if saved {
            emit(Level::Success, "users.repair.done", "user data repaired", None);
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySlotStore;
    use crate::users::{NewUser, USERS_BACKUP_SLOT, USERS_SLOT};

    fn seed(store: &UserStore<'_, MemorySlotStore>, name: &str, email: &str) {
        assert!(store.add(NewUser {
            id: None,
            name: name.to_string(),
            email: email.to_string(),
            password: "secret99".to_string(),
            is_admin: false,
            active: true,
        }));
    }

    #[test]
    fn clean_report() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");

        let report = store.check_integrity();
        assert!(report.ok);
        assert!(report.admin_exists);
        assert_eq!(report.total, 2);
        assert!(report.duplicated_emails.is_empty());
        assert!(report.invalid_records.is_empty());
    }

    #[test]
    fn repair_is_a_noop_on_consistent_data() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");

        let before = slots.get(USERS_SLOT).unwrap();
        assert!(store.repair());
        assert_eq!(slots.get(USERS_SLOT).unwrap(), before);
    }

    #[test]
    fn duplicated_email_is_reported_once_per_group() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");

        // two more records sharing Ana's email, written behind the
        // manager's back
        let mut users = store.load();
        for id in ["USR-010", "USR-011"] {
            let mut copy = users[1].clone();
            copy.id = id.to_string();
            users.push(copy);
        }
        slots.set(USERS_SLOT, &serde_json::to_string(&users).unwrap());

        let report = store.check_integrity();
        assert!(!report.ok);
        assert_eq!(report.duplicated_emails, vec!["ana@x.com".to_string()]);
    }

    #[test]
    fn repair_keeps_the_first_of_a_duplicate_pair() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");

        let mut users = store.load();
        let mut late_copy = users[1].clone();
        late_copy.id = "USR-010".to_string();
        late_copy.name = "Impostor".to_string();
        users.push(late_copy);
        slots.set(USERS_SLOT, &serde_json::to_string(&users).unwrap());

        assert!(store.repair());
        let users = store.load();
        let kept: Vec<&UserRecord> = users.iter().filter(|u| u.email == "ana@x.com").collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Ana");
        assert_eq!(kept[0].id, "USR-002");
    }

    #[test]
    fn malformed_records_are_flagged_and_repaired() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");

        // legacy payload damage: one record lost its name, another its id
        let raw = format!(
            "[{},{},{}]",
            serde_json::to_string(&default_admin()).unwrap(),
            r#"{"id":"USR-009","email":"nameless@x.com","senha":"x"}"#,
            r#"{"nome":"Ghost","email":"ghost@x.com"}"#,
        );
        slots.set(USERS_SLOT, &raw);

        let report = store.check_integrity();
        assert!(!report.ok);
        assert_eq!(
            report.invalid_records,
            vec!["USR-009".to_string(), "missing-id".to_string()]
        );

        assert!(store.repair());
        let report = store.check_integrity();
        assert!(report.ok);
        assert_eq!(report.total, 1);
    }

    #[test]
    fn malformed_admin_record_survives_repair() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);

        // the administrator lost its name; it must be kept anyway
        let raw = r#"[{"id":"USR-001","email":"admin","senha":"admin01","is_admin":true,"ativo":true}]"#;
        slots.set(USERS_SLOT, raw);

        assert!(store.repair());
        let users = store.load();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "USR-001");
    }

    #[test]
    fn corrupt_slot_recovers_from_backup_and_recommits() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);
        seed(&store, "Ana", "ana@x.com");
        seed(&store, "Bob", "bob@x.com");

        let good = slots.get(USERS_SLOT).unwrap();
        slots.set(USERS_BACKUP_SLOT, &good);
        slots.set(USERS_SLOT, "{not json at all");

        let users = store.load();
        assert_eq!(users.len(), 3);
        assert!(users.iter().any(|u| u.email == "bob@x.com"));

        // the recovered state was committed back to the canonical slot
        let recommitted: Vec<UserRecord> =
            serde_json::from_str(&slots.get(USERS_SLOT).unwrap()).unwrap();
        assert_eq!(recommitted.len(), 3);
    }

    #[test]
    fn unusable_backup_falls_back_to_seed() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);

        slots.set(USERS_SLOT, "42");
        slots.set(USERS_BACKUP_SLOT, "[]");

        let users = store.load();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "USR-001");
    }

    #[test]
    fn partial_records_deserialize_with_defaults() {
        let slots = MemorySlotStore::new();
        let store = UserStore::new(&slots);

        let raw = r#"[{"id":"USR-001","nome":"Administrator","email":"admin","senha":"admin01","is_admin":true,"ativo":true},
                      {"id":"USR-002","nome":"Old Record","email":"old@x.com","senha":"x"}]"#;
        slots.set(USERS_SLOT, raw);

        let users = store.load();
        assert_eq!(users.len(), 2);
        let old = &users[1];
        assert!(!old.active);
        assert!(!old.must_change_password);
        assert_eq!(old.created_at, 0);
        // well formed despite the missing flags, so no integrity issue
        assert!(store.check_integrity().ok);
    }
}
