//! Last-resort inspection and recovery of user data.
//!
//! Earlier releases of the office suite persisted user data under a
//! handful of different slot names. This command walks every slot the
//! store knows about, reports what each one holds, and can adopt user
//! records found under the legacy names into the canonical collection.

use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

use crate::storage::SlotStore;
use crate::ui::prelude::*;
use crate::users::{UserRecord, UserStore, next_id};

/// Slot names older releases used for the user list.
const LEGACY_USER_SLOTS: &[&str] = &[
    "usuarios",
    "mfs_usuarios",
    "users_data",
    "users_old",
    "backup_users",
];

#[derive(Debug, Serialize)]
struct SlotInfo {
    key: String,
    size: usize,
    shape: String,
    fields: String,
}

fn inspect<S: SlotStore>(slots: &S) -> Vec<SlotInfo> {
    slots
        .keys()
        .into_iter()
        .filter_map(|key| {
            let data = slots.get(&key)?;
            let (shape, fields) = describe(&data);
            Some(SlotInfo {
                key,
                size: data.len(),
                shape,
                fields,
            })
        })
        .collect()
}

fn describe(data: &str) -> (String, String) {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Array(items)) => {
            let fields = items
                .first()
                .and_then(|item| item.as_object())
                .map(|obj| obj.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_else(|| "-".to_string());
            (format!("sequence ({} item(s))", items.len()), fields)
        }
        Ok(Value::Object(obj)) => (
            "object".to_string(),
            obj.keys().cloned().collect::<Vec<_>>().join(", "),
        ),
        Ok(_) => ("scalar".to_string(), "-".to_string()),
        Err(_) => ("invalid json".to_string(), "-".to_string()),
    }
}

/// Parseable, non-empty user sequences found under legacy slot names.
fn legacy_candidates<S: SlotStore>(slots: &S) -> Vec<(&'static str, Vec<UserRecord>)> {
    LEGACY_USER_SLOTS
        .iter()
        .filter_map(|&slot| {
            let data = slots.get(slot)?;
            let users: Vec<UserRecord> = serde_json::from_str(&data).ok()?;
            if users.is_empty() {
                return None;
            }
            Some((slot, users))
        })
        .collect()
}

pub fn run<S: SlotStore>(slots: &S, apply: bool) -> Result<bool> {
    let inventory = inspect(slots);
    print_inventory(&inventory);

    let candidates = legacy_candidates(slots);
    if candidates.is_empty() {
        emit(
            Level::Info,
            "recover.none",
            "no user data found under legacy slot names",
            None,
        );
        return Ok(true);
    }

    for (slot, users) in &candidates {
        emit(
            Level::Info,
            "recover.found",
            &format!("{} record(s) found in legacy slot '{}'", users.len(), slot),
            None,
        );
    }
    if !apply {
        emit(
            Level::Info,
            "recover.hint",
            "run 'recover --apply' to adopt these records",
            None,
        );
        return Ok(true);
    }

    let store = UserStore::new(slots);
    let mut users = store.load();
    let mut adopted = 0usize;
    let mut skipped = 0usize;

    for (slot, found) in candidates {
        for mut record in found {
            if !record.is_well_formed() {
                skipped += 1;
                continue;
            }
            if users.iter().any(|u| u.email == record.email) {
                skipped += 1;
                continue;
            }
            // an id clash with a different account gets a fresh id
            if users.iter().any(|u| u.id == record.id) {
                record.id = next_id(&users);
            }
            emit(
                Level::Debug,
                "recover.adopt",
                &format!("adopting {} from '{}'", record.email, slot),
                None,
            );
            users.push(record);
            adopted += 1;
        }
    }

    if adopted == 0 {
        emit(
            Level::Info,
            "recover.nothing_new",
            &format!("nothing to adopt ({skipped} record(s) already present or malformed)"),
            None,
        );
        return Ok(true);
    }

    if !store.save(users) {
        return Ok(false);
    }
    emit(
        Level::Success,
        "recover.done",
        &format!("{adopted} record(s) adopted, {skipped} skipped"),
        None,
    );
    Ok(true)
}

fn print_inventory(inventory: &[SlotInfo]) {
    if get_output_format() == OutputFormat::Json {
        for info in inventory {
            let data = serde_json::to_value(info).ok();
            emit(Level::Info, "recover.slot", &info.key, data);
        }
        return;
    }

    if inventory.is_empty() {
        println!("The store holds no slots yet.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Slot", "Size", "Shape", "Fields"]);
    for info in inventory {
        table.add_row(vec![
            info.key.clone(),
            info.size.to_string(),
            info.shape.clone(),
            info.fields.clone(),
        ]);
    }
    println!("{table}");
}
