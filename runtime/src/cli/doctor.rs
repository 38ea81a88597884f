//! Environment readiness check.

use std::path::Path;

use anyhow::Result;

use crate::config::{resolve_config_path, Config};
use crate::renderer::chromium::{find_chromium, CHROMIUM_PATH_ENV};

/// Check the configuration, Chromium availability, and the state directory.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("schoolwatch doctor");
    println!("==================");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let mut ready = true;

    let path = resolve_config_path(config_path);
    let config = match Config::load(&path) {
        Ok(c) => {
            println!("[OK] Config loaded: {}", path.display());
            println!("     {} student(s), {} notifier(s)", c.accounts.len(), c.notifiers.len());
            if c.notifiers.is_empty() {
                println!("[!!] No notifiers configured; new homework will only be logged");
            }
            match &c.mqtt {
                Some(m) => println!("[OK] Home Assistant via MQTT: {}:{}", m.broker, m.port),
                None => println!("     MQTT not configured (set MQTT_BROKER to publish sensors)"),
            }
            Some(c)
        }
        Err(e) => {
            println!("[!!] Config NOT usable: {e}");
            ready = false;
            None
        }
    };

    let chromium = config
        .as_ref()
        .and_then(|c| c.browser.chromium_path.clone())
        .filter(|p| p.exists())
        .or_else(find_chromium);
    match &chromium {
        Some(p) => println!("[OK] Chromium found: {}", p.display()),
        None => {
            println!("[!!] Chromium NOT found. Install Chrome or set {CHROMIUM_PATH_ENV}.");
            println!("     Without it only the JSON API and manual tokens work.");
        }
    }

    if let Some(c) = &config {
        match check_writable(&c.paths.dir) {
            Ok(()) => println!("[OK] State directory writable: {}", c.paths.dir.display()),
            Err(e) => {
                println!("[!!] State directory {} not writable: {e}", c.paths.dir.display());
                ready = false;
            }
        }
    }

    println!();
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".schoolwatch-doctor");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_writable_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("state/nested");
        check_writable(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
    }
}
