//! Non-interactive startup preflight (SPEC_FULL §2 "Startup preflight"),
//! trimmed from the teacher's `setup/mod.rs`: browser-executable discovery,
//! storage-directory writability, and network/TLS reachability. No guided
//! remediation dialogs — the Browser Subsystem here is an already-
//! authenticated external collaborator, not something this crate walks a
//! human through logging into.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::CoreConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn is_fail(self) -> bool {
        matches!(self, CheckStatus::Fail)
    }

    fn glyph(self) -> &'static str {
        match self {
            CheckStatus::Pass => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetupCheck {
    pub id: String,
    pub title: String,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetupReport {
    pub checks: Vec<SetupCheck>,
}

impl SetupReport {
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_fail())
    }

    pub fn summarize_for_logs(&self) -> String {
        let pass = self.checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
        let warn = self.checks.iter().filter(|c| c.status == CheckStatus::Warn).count();
        let fail = self.checks.iter().filter(|c| c.status.is_fail()).count();
        format!("setup: {} pass, {} warn, {} fail", pass, warn, fail)
    }
}

impl fmt::Display for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            writeln!(f, "[{}] {} — {}", check.status.glyph(), check.title, check.details)?;
        }
        Ok(())
    }
}

async fn check_browser_executable() -> SetupCheck {
    match crate::searcher::find_chrome_executable() {
        Some(path) => SetupCheck {
            id: "browser_executable".into(),
            title: "Chromium-family browser".into(),
            status: CheckStatus::Pass,
            details: format!("found at {}", path),
        },
        None => SetupCheck {
            id: "browser_executable".into(),
            title: "Chromium-family browser".into(),
            status: CheckStatus::Fail,
            details: "no google-chrome/chromium/chromium-browser/brave-browser found on PATH; set CHROME_EXECUTABLE".into(),
        },
    }
}

async fn check_storage_writable(cfg: &CoreConfig) -> SetupCheck {
    for dir in [&cfg.coordinator_dir, &cfg.browser_data_dir, &cfg.log_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return SetupCheck {
                id: "storage_writable".into(),
                title: "Storage directories".into(),
                status: CheckStatus::Fail,
                details: format!("cannot create {:?}: {}", dir, e),
            };
        }
        let probe = dir.join(".huge-ai-search-write-probe");
        if let Err(e) = tokio::fs::write(&probe, b"ok").await {
            return SetupCheck {
                id: "storage_writable".into(),
                title: "Storage directories".into(),
                status: CheckStatus::Fail,
                details: format!("{:?} is not writable: {}", dir, e),
            };
        }
        let _ = tokio::fs::remove_file(&probe).await;
    }
    SetupCheck {
        id: "storage_writable".into(),
        title: "Storage directories".into(),
        status: CheckStatus::Pass,
        details: "coordinator, browser_data, and log directories are writable".into(),
    }
}

async fn check_network_reachable() -> SetupCheck {
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(c) => c,
        Err(e) => {
            return SetupCheck {
                id: "network_reachable".into(),
                title: "Network reachability".into(),
                status: CheckStatus::Warn,
                details: format!("could not build HTTP client: {}", e),
            }
        }
    };
    match client.head("https://www.google.com").send().await {
        Ok(_) => SetupCheck {
            id: "network_reachable".into(),
            title: "Network reachability".into(),
            status: CheckStatus::Pass,
            details: "reached google.com over HTTPS".into(),
        },
        Err(e) => SetupCheck {
            id: "network_reachable".into(),
            title: "Network reachability".into(),
            status: CheckStatus::Warn,
            details: format!("could not reach google.com: {} (search calls will likely fail)", e),
        },
    }
}

/// Runs every preflight check. Never returns `Err` — individual check
/// failures are reported, not propagated, so a degraded environment still
/// starts the stdio transport and fails individual `search` calls instead.
pub async fn check_all(cfg: &CoreConfig) -> SetupReport {
    SetupReport {
        checks: vec![
            check_browser_executable().await,
            check_storage_writable(cfg).await,
            check_network_reachable().await,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_check_passes_for_writable_tempdir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = CoreConfig::resolve();
        cfg.coordinator_dir = tmp.path().join("coordinator");
        cfg.browser_data_dir = tmp.path().join("browser_data");
        cfg.log_dir = tmp.path().join("logs");
        let check = check_storage_writable(&cfg).await;
        assert_eq!(check.status, CheckStatus::Pass);
    }

    #[test]
    fn report_summary_counts_each_status() {
        let report = SetupReport {
            checks: vec![
                SetupCheck { id: "a".into(), title: "A".into(), status: CheckStatus::Pass, details: String::new() },
                SetupCheck { id: "b".into(), title: "B".into(), status: CheckStatus::Fail, details: String::new() },
            ],
        };
        assert!(report.has_failures());
        assert_eq!(report.summarize_for_logs(), "setup: 1 pass, 0 warn, 1 fail");
    }
}
