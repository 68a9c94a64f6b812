//! The `mboxlock` binary end to end, against a scratch spool.

use mboxlock::mail::dotlock::DotLocker;
use mboxlock::{MailLockConfig, MailLockStatus, MailLocker};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn write_config(dir: &Path, spool: &Path) -> PathBuf {
    let config = serde_json::json!({
        "mail": {
            "spool_dir": spool,
            "honor_mail_env": false,
            "retry_step_ms": 10,
            "retry_max_ms": 20
        }
    });
    let path = dir.join("mboxlock.json");
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

fn mboxlock(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mboxlock"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

fn rival(spool: &Path) -> DotLocker {
    DotLocker::new(MailLockConfig {
        spool_dir: spool.to_path_buf(),
        honor_mail_env: false,
        retry_step_ms: 10,
        retry_max_ms: 20,
        ..MailLockConfig::default()
    })
}

#[test]
fn test_mail_lock_survives_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    std::fs::create_dir(&spool).unwrap();
    let config = write_config(dir.path(), &spool);
    let lock_path = spool.join("zed.lock");

    let out = mboxlock(&config, &["mail", "lock", "--user", "zed", "--retries", "0"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        lock_path.display().to_string()
    );

    // Owned by this test process, which is still running
    let owner = std::fs::read_to_string(&lock_path).unwrap();
    assert_eq!(owner.trim(), std::process::id().to_string());

    let mut other = rival(&spool);
    assert_eq!(other.acquire("zed", 1), MailLockStatus::MaxTries);
    assert!(lock_path.exists());

    let out = mboxlock(&config, &["mail", "unlock", "--user", "zed"]);
    assert!(out.status.success());
    assert!(!lock_path.exists());
    assert_eq!(other.acquire("zed", 0), MailLockStatus::Success);
}

#[test]
fn test_mail_lock_busy_exits_tempfail() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    std::fs::create_dir(&spool).unwrap();
    let config = write_config(dir.path(), &spool);

    let mut holder = rival(&spool);
    assert!(holder.acquire("yara", 0).is_success());

    let out = mboxlock(&config, &["mail", "lock", "--user", "yara", "--retries", "1"]);
    assert_eq!(out.status.code(), Some(75));
}
