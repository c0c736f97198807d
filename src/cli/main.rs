//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailadm.
//
// Mailadm is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mailadm is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailadm. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
/// Manage the virtual mail accounts shared by Postfix and Dovecot.
///
/// Every account is recorded in three files: the mailadm ledger, Dovecot's
/// passwd-file, and Postfix's virtual mailbox map. Commands which change
/// accounts lock out other invocations of mailadm until all three files
/// have been updated.
struct Options {
    /// The path to `mailadm.toml`
    /// [default: /etc/mailadm/mailadm.toml or
    /// /usr/local/etc/mailadm/mailadm.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log debugging information.
    #[structopt(short, long)]
    verbose: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    Add(AddSubcommand),
    /// List the accounts in the ledger.
    List(ListSubcommand),
    Remove(RemoveSubcommand),
    Prune(PruneSubcommand),
    /// Verify that every account is present exactly once in each file.
    ///
    /// Also reports an operation which was interrupted part-way through.
    /// Exits with status 65 if anything is amiss.
    Check,
}

/// Create a new mail account.
///
/// Prints the account's password, which is not recorded anywhere in clear
/// text.
#[derive(StructOpt)]
pub(super) struct AddSubcommand {
    /// Use this password instead of generating one.
    #[structopt(long, conflicts_with = "prompt-password")]
    pub(super) password: Option<String>,

    /// Prompt for the password instead of generating one.
    #[structopt(long)]
    pub(super) prompt_password: bool,

    /// The token profile whose expiry and name are recorded with the
    /// account [default: the first configured profile]
    #[structopt(long)]
    pub(super) token: Option<String>,

    /// Don't change any files, only show what would be changed.
    #[structopt(short = "n", long)]
    pub(super) dry_run: bool,

    /// The email address of the new account.
    pub(super) email: String,
}

#[derive(StructOpt)]
pub(super) struct ListSubcommand {
    /// Only list accounts starting with this prefix.
    pub(super) prefix: Option<String>,
}

/// Remove accounts and their mailbox directories.
#[derive(StructOpt)]
pub(super) struct RemoveSubcommand {
    /// Don't change any files, only show what would be changed.
    #[structopt(short = "n", long)]
    pub(super) dry_run: bool,

    /// The email addresses to remove.
    #[structopt(required = true)]
    pub(super) emails: Vec<String>,
}

/// Remove accounts which have outlived their expiry.
///
/// Expired accounts are dropped from the ledger, then removed from the
/// other files, and finally their mailbox directories are deleted.
#[derive(StructOpt)]
pub(super) struct PruneSubcommand {
    /// Only list the accounts which would be removed.
    #[structopt(short = "n", long)]
    pub(super) dry_run: bool,
}

/// The loaded configuration and where mutating commands take their lock.
pub(super) struct Environment {
    pub(super) config: SystemConfig,
    pub(super) lock_dir: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let config_path = options.config.unwrap_or_else(|| {
        if Path::new("/etc/mailadm/mailadm.toml").is_file() {
            "/etc/mailadm/mailadm.toml".to_owned().into()
        } else if Path::new("/usr/local/etc/mailadm/mailadm.toml").is_file() {
            "/usr/local/etc/mailadm/mailadm.toml".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/mailadm nor /usr/local/etc/mailadm contains\n\
                 mailadm.toml; use --config=/path/to/mailadm.toml if your\n\
                 installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let config = load_config(&config_path);
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    init_log(config_dir, options.verbose);

    let env = Environment {
        lock_dir: config
            .sysconfig
            .lock_dir
            .clone()
            .unwrap_or_else(|| config_dir.to_owned()),
        config,
    };

    match options.command {
        Command::Add(cmd) => super::account::add(&env, cmd),
        Command::List(cmd) => super::account::list(&env, cmd),
        Command::Remove(cmd) => super::account::remove(&env, cmd),
        Command::Prune(cmd) => super::account::prune(&env, cmd),
        Command::Check => super::account::check(&env),
    }
}

fn load_config(path: &Path) -> SystemConfig {
    let mut toml_data = Vec::new();
    if let Err(e) =
        fs::File::open(path).and_then(|mut f| f.read_to_end(&mut toml_data))
    {
        die!(EX_CONFIG, "Error reading '{}': {}", path.display(), e);
    }

    match toml::from_slice(&toml_data) {
        Ok(config) => config,
        Err(e) => die!(
            EX_CONFIG,
            "Error in config file at '{}': {}",
            path.display(),
            e
        ),
    }
}

fn init_log(config_dir: &Path, verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log(level);
        return;
    }

    // Run from cron or a web hook; the audit trail of store edits needs to
    // end up somewhere persistent.
    let log_config_file = config_dir.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        match syslog::unix(formatter) {
            Ok(logger) => {
                if let Err(e) = log::set_boxed_logger(Box::new(
                    syslog::BasicLogger::new(logger),
                ))
                .map(|_| log::set_max_level(level))
                {
                    die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
                }
            }
            // No syslog daemon; stderr is better than nothing
            Err(_) => crate::init_simple_log(level),
        }
    }
}
