//! Command-line Interface
//!
//! Argument parsing and credential resolution. Credentials come from
//! flags, then environment variables, then an interactive prompt, in that
//! order.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use crate::auth::Credentials;
use crate::monitor::DEFAULT_POLL_INTERVAL_SECS;
use crate::storage::StateStore;

pub const USERNAME_ENV: &str = "FORDPASS_USERNAME";
pub const PASSWORD_ENV: &str = "FORDPASS_PASSWORD";
pub const VIN_ENV: &str = "FORDPASS_VIN";

/// Monitor Ford EV battery status and show notifications on changes
#[derive(Debug, Parser)]
#[command(name = "fordpass-monitor", version)]
pub struct Cli {
    /// FordPass username/email
    #[arg(short, long)]
    pub username: Option<String>,

    /// FordPass password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Vehicle identification number
    #[arg(short, long)]
    pub vin: Option<String>,

    /// Check interval in seconds
    #[arg(short, long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub interval: u64,

    /// State file path for saving the last known battery state
    #[arg(short, long)]
    pub state_file: Option<PathBuf>,

    /// Print notifications to the console instead of the desktop
    #[arg(long)]
    pub console: bool,
}

impl Cli {
    /// Resolve the credential triple, prompting for anything still missing
    pub fn resolve_credentials(&self) -> io::Result<Credentials> {
        let username = resolve(
            self.username.clone(),
            USERNAME_ENV,
            "Enter your FordPass username/email: ",
        )?;
        let password = resolve(
            self.password.clone(),
            PASSWORD_ENV,
            "Enter your FordPass password: ",
        )?;
        let vin = resolve(self.vin.clone(), VIN_ENV, "Enter your vehicle VIN: ")?;

        Ok(Credentials {
            username,
            password,
            vin,
        })
    }

    /// State file path, defaulting to the platform data directory
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(StateStore::default_path)
    }
}

fn resolve(flag: Option<String>, env_var: &str, prompt_text: &str) -> io::Result<String> {
    if let Some(value) = flag {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    prompt(prompt_text)
}

fn prompt(text: &str) -> io::Result<String> {
    print!("{}", text);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
