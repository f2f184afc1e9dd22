mod auth;
mod common;
mod doctor;
mod recover;
mod storage;
mod ui;
mod users;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dialoguer::Password;

use crate::common::paths;
use crate::storage::FileSlotStore;
use crate::ui::prelude::*;
use crate::users::UserStore;
use crate::users::commands::UserCommands;

/// Easy Office command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit JSON event lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Override the directory holding the slot files
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// User account management
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Log in and store a session
    Login { email: String },
    /// Clear the stored session
    Logout,
    /// Show the active session
    Whoami,
    /// Check the integrity of the user store
    Doctor {
        /// Repair the problems found
        #[arg(long)]
        fix: bool,
    },
    /// Inspect slots and recover user data from older releases
    Recover {
        /// Adopt recovered records into the user store
        #[arg(long)]
        apply: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    ui::set_debug_mode(cli.debug);
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, !cli.json);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            emit(Level::Error, "cli.error", &format!("{e:#}"), None);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let data_dir = paths::resolve_data_dir(cli.data_dir)?;
    let slots = FileSlotStore::open(data_dir)?;
    let store = UserStore::new(&slots);

    match cli.command {
        Commands::Users { command } => users::commands::handle(&slots, &store, command),
        Commands::Login { email } => {
            let password = Password::new()
                .with_prompt(format!("Password for {email}"))
                .interact()?;
            Ok(auth::login(&slots, &email, &password))
        }
        Commands::Logout => Ok(auth::logout(&slots)),
        Commands::Whoami => Ok(auth::whoami(&slots)),
        Commands::Doctor { fix } => doctor::run(&store, &slots, fix),
        Commands::Recover { apply } => recover::run(&slots, apply),
    }
}
