use crate::bridge::LockBridge;
use crate::config::settings::BridgeConfig;
use crate::config::types::{BridgeError, LockMode};
use crate::kernel::signal::SignalHandler;
use crate::mail::dotlock::DotLocker;
use crate::mail::refresher::LockRefresher;
use crate::mail::MailLocker;
use crate::spool::SpoolLock;
use anyhow::Result;
use chrono::TimeZone;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to $MBOXLOCK_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// Shared read lock
    R,
    /// Exclusive write lock
    Rw,
}

impl ModeArg {
    fn tag(self) -> &'static str {
        match self {
            Self::R => "r",
            Self::Rw => "rw",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Hold an advisory lock on a file while a command runs (or until a signal)
    Lock {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "rw")]
        mode: ModeArg,
        /// Wait for the lock instead of failing when it is held
        #[arg(long)]
        wait: bool,
        /// Command and arguments to run while the lock is held
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Report whether another process holds a conflicting advisory lock
    Probe {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "rw")]
        mode: ModeArg,
    },
    /// Print the last access time of a path in milliseconds
    Atime {
        path: PathBuf,
        /// Keep sub-second precision
        #[arg(long)]
        precise: bool,
    },
    /// Mailbox dotlock operations
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },
    /// Run a command with the user's spool dotlocked and fcntl-locked
    Inbox {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum, default_value = "rw")]
        mode: ModeArg,
        #[arg(long, default_value_t = 5)]
        retries: u32,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum MailAction {
    /// Create the dotlock and leave it in place
    Lock {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 5)]
        retries: u32,
    },
    /// Remove a dotlock
    Unlock {
        #[arg(long)]
        user: String,
    },
    /// Refresh a dotlock's timestamp
    Touch {
        #[arg(long)]
        user: String,
    },
    /// Run a command while holding the dotlock
    Run {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 5)]
        retries: u32,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path),
        None => BridgeConfig::load_default(),
    }
    .unwrap_or_else(|e| fail(&e));
    config.validate().unwrap_or_else(|e| fail(&e));

    match cli.command {
        Commands::Lock {
            path,
            mode,
            wait,
            command,
        } => {
            // Handlers first so a signal can interrupt a blocking wait
            let signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
            let bridge = LockBridge::from_stdin(config);
            let file = open_for(&path, LockMode::from_tag(mode.tag()))?;

            if let Err(e) = bridge.try_lock(&file, mode.tag(), wait) {
                fail(&e);
            }
            eprintln!("Locked {} ({})", path.display(), LockMode::from_tag(mode.tag()));

            if command.is_empty() {
                let signal = signals.wait_with(Duration::from_secs(1), || {});
                eprintln!("Received signal {}, releasing {}", signal, path.display());
                Ok(())
            } else {
                let code = run_command(&command)?;
                drop(file);
                std::process::exit(code);
            }
        }
        Commands::Probe { path, mode } => {
            let bridge = LockBridge::from_stdin(config);
            let file = open_for(&path, LockMode::Read)?;
            match bridge.probe(&file, mode.tag()) {
                Ok(None) => {
                    println!("free");
                    Ok(())
                }
                Ok(Some(holder)) => {
                    println!("{} lock held by pid {}", holder.mode, holder.pid);
                    std::process::exit(2);
                }
                Err(e) => fail(&e),
            }
        }
        Commands::Atime { path, precise } => {
            let bridge = LockBridge::from_stdin(BridgeConfig {
                precise_access_time: precise || config.precise_access_time,
                ..config
            });
            match bridge.try_last_accessed(&path) {
                Ok(millis) => {
                    let rendered = chrono::Utc
                        .timestamp_millis_opt(millis)
                        .single()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    println!("{} {}", millis, rendered);
                    Ok(())
                }
                Err(e) => {
                    println!("-1");
                    fail(&e)
                }
            }
        }
        Commands::Mail { action } => run_mail(config, action),
        Commands::Inbox {
            user,
            mode,
            retries,
            command,
        } => {
            let mut bridge = LockBridge::from_stdin(config);
            let code = {
                let spool = SpoolLock::acquire(&mut bridge, &user, mode.tag(), retries)
                    .unwrap_or_else(|e| fail(&e));
                eprintln!("Locked spool {} ({})", spool.path().display(), spool.mode());
                run_command(&command)?
            };
            std::process::exit(code);
        }
    }
}

fn run_mail(config: BridgeConfig, action: MailAction) -> Result<()> {
    match action {
        MailAction::Lock { user, retries } => {
            // The lock outlives us, so it names the invoking process as owner
            let owner = nix::unistd::getppid().as_raw() as u32;
            let mut locker = DotLocker::new(config.mail).with_owner_pid(owner);
            let status = locker.acquire(&user, retries);
            if !status.is_success() {
                fail(&BridgeError::MailLock(status));
            }
            if let Some(path) = locker.persist() {
                println!("{}", path.display());
            }
            Ok(())
        }
        MailAction::Unlock { user } => {
            let mut locker = DotLocker::new(config.mail);
            let status = locker.adopt(&user);
            if !status.is_success() {
                fail(&BridgeError::MailLock(status));
            }
            locker.release();
            Ok(())
        }
        MailAction::Touch { user } => {
            let mut locker = DotLocker::new(config.mail);
            let status = locker.adopt(&user);
            if !status.is_success() {
                fail(&BridgeError::MailLock(status));
            }
            locker.refresh();
            locker.persist();
            Ok(())
        }
        MailAction::Run {
            user,
            retries,
            command,
        } => {
            let interval = config.mail.refresh_interval();
            let mut bridge = LockBridge::from_stdin(config);
            let status = bridge.mail_lock_status(&user, retries);
            if !status.is_success() {
                fail(&BridgeError::MailLock(status));
            }

            let refresher = bridge
                .mail_locker()
                .refresh_task()
                .map(|task| LockRefresher::spawn(interval, task));
            let code = run_command(&command);

            drop(refresher);
            bridge.mail_unlock();
            std::process::exit(code?);
        }
    }
}

fn open_for(path: &Path, mode: LockMode) -> Result<std::fs::File> {
    OpenOptions::new()
        .read(true)
        .write(mode == LockMode::Write)
        .open(path)
        .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", path.display(), e))
}

/// Run `command`, returning its exit code (128 + signal when killed)
fn run_command(command: &[String]) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("missing command"))?;
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", program, e))?;

    use std::os::unix::process::ExitStatusExt;
    Ok(status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
}

fn fail(err: &BridgeError) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(i32::from(err));
}
