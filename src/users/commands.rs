use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Subcommand;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use dialoguer::{Confirm, Password};
use serde::Serialize;

use crate::auth;
use crate::storage::SlotStore;
use crate::ui::prelude::*;

use super::{NewUser, PublicUser, UserPatch, UserStore};

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List user accounts
    List {
        /// Filter by name or email
        #[arg(short, long)]
        search: Option<String>,
        /// Include deactivated accounts
        #[arg(long)]
        inactive: bool,
    },
    /// Create a user account
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Initial password; prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
        /// Create the account deactivated
        #[arg(long)]
        inactive: bool,
    },
    /// Update fields of an account
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        admin: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Remove an account
    Remove {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show one account by id or email
    Show { query: String },
    /// Show user statistics
    Count,
    /// Export accounts without passwords
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Change a password (defaults to the logged-in account)
    Passwd { id: Option<String> },
    /// Reset a password, forcing a change on the next login
    ResetPassword { id: String },
}

pub fn handle<S: SlotStore>(
    slots: &S,
    store: &UserStore<'_, S>,
    command: UserCommands,
) -> Result<bool> {
    match command {
        UserCommands::List { search, inactive } => list(store, search.as_deref(), inactive),
        UserCommands::Add {
            name,
            email,
            password,
            admin,
            inactive,
        } => add(store, name, email, password, admin, inactive),
        UserCommands::Update {
            id,
            name,
            email,
            admin,
            active,
        } => {
            let patch = UserPatch {
                name,
                email,
                is_admin: admin,
                active,
                ..Default::default()
            };
            let updated = store.update(&id, &patch);
            if updated {
                emit(Level::Success, "users.update.ok", &format!("{id} updated"), None);
            }
            Ok(updated)
        }
        UserCommands::Remove { id, yes } => remove(slots, store, &id, yes),
        UserCommands::Show { query } => show(store, &query),
        UserCommands::Count => count(store),
        UserCommands::Export { output } => export(store, output),
        UserCommands::Passwd { id } => passwd(slots, store, id),
        UserCommands::ResetPassword { id } => reset_password(store, &id),
    }
}

fn list<S: SlotStore>(
    store: &UserStore<'_, S>,
    search: Option<&str>,
    include_inactive: bool,
) -> Result<bool> {
    let term = search.map(|s| s.to_lowercase());
    let users: Vec<PublicUser> = store
        .export()
        .into_iter()
        .filter(|u| include_inactive || u.active)
        .filter(|u| match &term {
            Some(term) => {
                u.name.to_lowercase().contains(term) || u.email.to_lowercase().contains(term)
            }
            None => true,
        })
        .collect();

    if get_output_format() == OutputFormat::Json {
        print_json(&users)?;
        return Ok(true);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Name", "Email", "Admin", "Active", "Created"]);
    for user in &users {
        table.add_row(vec![
            user.id.clone(),
            user.name.clone(),
            user.email.clone(),
            yes_no(user.is_admin),
            yes_no(user.active),
            format_timestamp(user.created_at),
        ]);
    }
    println!("{table}");
    Ok(true)
}

fn add<S: SlotStore>(
    store: &UserStore<'_, S>,
    name: String,
    email: String,
    password: Option<String>,
    admin: bool,
    inactive: bool,
) -> Result<bool> {
    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Initial password")
            .with_confirmation("Confirm password", "the passwords do not match")
            .interact()?,
    };

    let added = store.add(NewUser {
        id: None,
        name,
        email: email.clone(),
        password,
        is_admin: admin,
        active: !inactive,
    });
    if added {
        let user = store
            .find_by_email(&email)
            .context("account missing right after it was added")?;
        emit(
            Level::Success,
            "users.add.ok",
            &format!("{} created as {}", user.name, user.id),
            None,
        );
    }
    Ok(added)
}

fn remove<S: SlotStore>(
    slots: &S,
    store: &UserStore<'_, S>,
    id: &str,
    yes: bool,
) -> Result<bool> {
    if !yes {
        let name = store
            .find_by_id(id)
            .map(|u| u.name)
            .unwrap_or_else(|| id.to_string());
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove user \"{name}\"? This cannot be undone"))
            .default(false)
            .interact()?;
        if !confirmed {
            emit(Level::Info, "users.remove.cancelled", "removal cancelled", None);
            return Ok(true);
        }
    }

    let session = auth::current_session(slots);
    let removed = store.remove(id, session.as_ref().map(|s| s.id.as_str()));
    if removed {
        emit(Level::Success, "users.remove.ok", &format!("{id} removed"), None);
    }
    Ok(removed)
}

fn show<S: SlotStore>(store: &UserStore<'_, S>, query: &str) -> Result<bool> {
    let Some(user) = store
        .find_by_id(query)
        .or_else(|| store.find_by_email(query))
    else {
        emit(
            Level::Error,
            "users.show.not_found",
            &format!("no account matches {query}"),
            None,
        );
        return Ok(false);
    };
    let user = PublicUser::from(&user);

    if get_output_format() == OutputFormat::Json {
        print_json(&user)?;
        return Ok(true);
    }

    println!("Id:       {}", user.id);
    println!("Name:     {}", user.name);
    println!("Email:    {}", user.email);
    println!("Admin:    {}", yes_no(user.is_admin));
    println!("Active:   {}", yes_no(user.active));
    println!("Password change pending: {}", yes_no(user.must_change_password));
    println!("Created:  {}", format_timestamp(user.created_at));
    println!("Updated:  {}", format_timestamp(user.updated_at));
    Ok(true)
}

fn count<S: SlotStore>(store: &UserStore<'_, S>) -> Result<bool> {
    let counts = store.count();

    if get_output_format() == OutputFormat::Json {
        print_json(&counts)?;
        return Ok(true);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Total", "Active", "Admins"]);
    table.add_row(vec![
        counts.total.to_string(),
        counts.active.to_string(),
        counts.admins.to_string(),
    ]);
    println!("{table}");
    Ok(true)
}

fn export<S: SlotStore>(store: &UserStore<'_, S>, output: Option<PathBuf>) -> Result<bool> {
    let users = store.export();
    let payload = serde_json::to_string_pretty(&users).context("serializing export")?;

    match output {
        Some(path) => {
            fs::write(&path, payload)
                .with_context(|| format!("writing export to {}", path.display()))?;
            emit(
                Level::Success,
                "users.export.ok",
                &format!("{} account(s) exported to {}", users.len(), path.display()),
                None,
            );
        }
        None => println!("{payload}"),
    }
    Ok(true)
}

fn passwd<S: SlotStore>(
    slots: &S,
    store: &UserStore<'_, S>,
    id: Option<String>,
) -> Result<bool> {
    let Some(id) = id.or_else(|| auth::current_session(slots).map(|s| s.id)) else {
        emit(
            Level::Error,
            "users.passwd.no_session",
            "no account id given and no active session",
            None,
        );
        return Ok(false);
    };

    let current = Password::new().with_prompt("Current password").interact()?;
    let new = Password::new()
        .with_prompt("New password")
        .with_confirmation("Confirm new password", "the passwords do not match")
        .interact()?;

    let changed = store.change_password(&id, &current, &new);
    if changed {
        emit(Level::Success, "users.passwd.ok", "password updated", None);
        auth::refresh_session(slots);
    }
    Ok(changed)
}

fn reset_password<S: SlotStore>(store: &UserStore<'_, S>, id: &str) -> Result<bool> {
    let new = Password::new()
        .with_prompt("New password")
        .with_confirmation("Confirm new password", "the passwords do not match")
        .interact()?;

    let reset = store.reset_password(id, &new);
    if reset {
        emit(
            Level::Success,
            "users.reset.ok",
            &format!("password reset; {id} must pick a new one on the next login"),
            None,
        );
    }
    Ok(reset)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

fn yes_no(flag: bool) -> String {
    if flag { "yes".to_string() } else { "no".to_string() }
}

fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
