//! Health checks for the user store.

use anyhow::Result;
use colored::*;
use serde::Serialize;

use crate::storage::SlotStore;
use crate::ui::prelude::*;
use crate::users::{USERS_BACKUP_SLOT, USERS_SLOT, UserRecord, UserStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "message")]
pub enum CheckStatus {
    Pass(String),
    Fail(String),
    Warning(String),
}

impl CheckStatus {
    pub fn message(&self) -> &str {
        match self {
            CheckStatus::Pass(msg) => msg,
            CheckStatus::Fail(msg) => msg,
            CheckStatus::Warning(msg) => msg,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail(_))
    }

    fn label(&self) -> ColoredString {
        match self {
            CheckStatus::Pass(_) => "PASS".green(),
            CheckStatus::Fail(_) => "FAIL".red(),
            CheckStatus::Warning(_) => "WARN".yellow(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    #[serde(flatten)]
    pub status: CheckStatus,
}

/// Probe the raw slots first, then the loaded collection. The raw probes
/// have to run before anything calls `load`, because loading a damaged
/// slot recovers it.
pub fn run_checks<S: SlotStore>(store: &UserStore<'_, S>, slots: &S) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(CheckResult {
        name: "user slot",
        status: match slots.get(USERS_SLOT) {
            None => CheckStatus::Warning("not written yet".to_string()),
            Some(data) => match serde_json::from_str::<Vec<UserRecord>>(&data) {
                Ok(users) => CheckStatus::Pass(format!("{} record(s)", users.len())),
                Err(e) => CheckStatus::Fail(format!("unparseable payload: {e}")),
            },
        },
    });

    results.push(CheckResult {
        name: "backup slot",
        status: match slots.get(USERS_BACKUP_SLOT) {
            None => CheckStatus::Warning("no backup generation yet".to_string()),
            Some(data) => match serde_json::from_str::<Vec<UserRecord>>(&data) {
                Ok(users) => CheckStatus::Pass(format!("{} record(s)", users.len())),
                Err(_) => CheckStatus::Warning("backup holds an unparseable payload".to_string()),
            },
        },
    });

    let report = store.check_integrity();

    results.push(CheckResult {
        name: "administrator",
        status: if report.admin_exists {
            CheckStatus::Pass("present".to_string())
        } else {
            CheckStatus::Fail("no administrator account".to_string())
        },
    });

    results.push(CheckResult {
        name: "unique emails",
        status: if report.duplicated_emails.is_empty() {
            CheckStatus::Pass(format!("{} account(s), no duplicates", report.total))
        } else {
            CheckStatus::Fail(format!("duplicated: {}", report.duplicated_emails.join(", ")))
        },
    });

    results.push(CheckResult {
        name: "record shape",
        status: if report.invalid_records.is_empty() {
            CheckStatus::Pass("all records carry id, name and email".to_string())
        } else {
            CheckStatus::Fail(format!("malformed: {}", report.invalid_records.join(", ")))
        },
    });

    results
}

pub fn run<S: SlotStore>(store: &UserStore<'_, S>, slots: &S, fix: bool) -> Result<bool> {
    let results = run_checks(store, slots);
    print_results(&results);

    let failures = results.iter().any(|r| r.status.is_failure());
    if !failures {
        return Ok(true);
    }
    if !fix {
        emit(
            Level::Info,
            "doctor.hint",
            "run 'doctor --fix' to repair the problems found",
            None,
        );
        return Ok(false);
    }

    if !store.repair() {
        return Ok(false);
    }
    let after = run_checks(store, slots);
    Ok(!after.iter().any(|r| r.status.is_failure()))
}

fn print_results(results: &[CheckResult]) {
    if get_output_format() == OutputFormat::Json {
        for result in results {
            let data = serde_json::to_value(result).ok();
            emit(Level::Info, "doctor.check", result.status.message(), data);
        }
        return;
    }

    let header = format!(
        "{: <16} [{}] {}",
        "Check".bold(),
        "Status".bold(),
        "Message".bold()
    );
    println!("{}", header);

    for result in results {
        let line = format!(
            "{: <16} [{}] {}",
            result.name,
            result.status.label(),
            result.status.message()
        );
        println!("{}", line);
    }
}
