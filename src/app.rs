//! Wires the module-scoped singletons (spec §9 "Design Notes") into one
//! `AppState` constructed once at process startup, mirroring the teacher's
//! `core/app_state.rs::AppState::new` composition pattern.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::captcha::CaptchaGate;
use crate::clock::{Clock, SystemClock};
use crate::cooldown::CooldownLatch;
use crate::coordinator::Coordinator;
use crate::core::config::CoreConfig;
use crate::gate::LocalGate;
use crate::pipeline::Pipeline;
use crate::searcher::ChromiumSearcherFactory;
use crate::session::SessionRegistry;

pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub pipeline: Arc<Pipeline>,
    sweep_task: tokio::task::JoinHandle<()>,
    retention_task: tokio::task::JoinHandle<()>,
}

impl AppState {
    pub async fn new(cfg: CoreConfig) -> Self {
        let cfg = Arc::new(cfg);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let coordinator = Arc::new(
            Coordinator::new(
                cfg.coordinator_dir.clone(),
                cfg.max_global_slots,
                cfg.heartbeat_interval,
                cfg.lease_window,
            )
            .await,
        );
        let local_gate = Arc::new(LocalGate::new(cfg.max_local_slots));
        let captcha_gate = Arc::new(CaptchaGate::new());
        let cooldown = Arc::new(CooldownLatch::new(cfg.cooldown_window, clock.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            cfg.clone(),
            Arc::new(ChromiumSearcherFactory),
            clock.clone(),
        ));

        let pipeline = Arc::new(Pipeline {
            cfg: cfg.clone(),
            coordinator,
            local_gate,
            captcha_gate,
            cooldown,
            sessions: sessions.clone(),
            clock,
        });

        // Background sweep (spec §4.C): idle/max-use session eviction.
        const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
        let sweep_sessions = sessions.clone();
        let sweep_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tick.tick().await;
                sweep_sessions.sweep().await;
            }
        });

        let log_dir = cfg.log_dir.clone();
        let retention_days = cfg.log_retention_days;
        let retention_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(6 * 60 * 60));
            loop {
                tick.tick().await;
                crate::logging::sweep_retention(&log_dir, retention_days).await;
            }
        });

        let report = crate::setup::check_all(&cfg).await;
        info!("{}", report.summarize_for_logs());
        if report.has_failures() {
            tracing::warn!("startup checklist found failures; run huge-ai-search-mcp --setup for details");
        }

        info!(
            "huge-ai-search: initialized (max_local_slots={}, max_global_slots={}, max_sessions={})",
            cfg.max_local_slots, cfg.max_global_slots, cfg.max_sessions
        );

        Self {
            cfg,
            pipeline,
            sweep_task,
            retention_task,
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.sweep_task.abort();
        self.retention_task.abort();
    }
}
