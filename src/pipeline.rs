//! Request Pipeline (spec §4.G): the single place that sequences
//! cooldown → CAPTCHA-wait → local gate → global gate → session →
//! execute → grounding policy → shape → release, for every `search` call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::captcha::{AcquireOutcome, CaptchaGate};
use crate::clock::Clock;
use crate::cooldown::{matches_timeout_keywords, CooldownLatch, CooldownState};
use crate::coordinator::Coordinator;
use crate::core::config::CoreConfig;
use crate::core::error::PipelineError;
use crate::core::types::{Language, SearchRequest, SearchResult, CAPTCHA_HANDLED_BY_OTHER_REQUEST};
use crate::gate::LocalGate;
use crate::grounding;
use crate::logging;
use crate::markdown::{self, ResultContext};
use crate::searcher::sanitize_sources;
use crate::session::SessionRegistry;

pub struct Pipeline {
    pub cfg: Arc<CoreConfig>,
    pub coordinator: Arc<Coordinator>,
    pub local_gate: Arc<LocalGate>,
    pub captcha_gate: Arc<CaptchaGate>,
    pub cooldown: Arc<CooldownLatch>,
    pub sessions: Arc<SessionRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Logs the internal failure classification (spec §7) before handing
    /// back its pre-rendered Markdown body; the enum never escapes this
    /// function.
    fn reject(&self, err: PipelineError, markdown: String) -> String {
        warn!("pipeline: rejected ({})", err);
        markdown
    }

    pub async fn handle(&self, mut req: SearchRequest) -> String {
        let started = Instant::now();

        // Phase 1: input normalize.
        req.query = req.query.trim().to_string();
        if let Some(p) = &req.image_path {
            req.image_path = Some(p.trim().to_string());
        }
        if req.image_path.as_deref().is_some() {
            req.follow_up = false;
        }
        if req.query.is_empty() && req.image_path.as_deref().unwrap_or("").is_empty() {
            return self.reject(
                PipelineError::InputEmpty,
                markdown::input_error("empty query and empty image path"),
            );
        }

        // Phase 2: cooldown check.
        match self.cooldown.check().await {
            CooldownState::Active { remaining_secs } => {
                return self.reject(
                    PipelineError::Cooldown { remaining_secs },
                    markdown::cooldown(remaining_secs),
                );
            }
            CooldownState::Clear => {}
        }

        // Phase 3: CAPTCHA wait. A live recovery blocks new calls, but
        // merely asking the gate a question never acquires it — this call
        // only becomes the gate's owner later, if its own execution turns
        // up a CAPTCHA/login-timeout keyword (spec §4.D "keyword path").
        if self.captcha_gate.is_held().await
            && !self
                .captcha_gate
                .wait_for_release(self.cfg.captcha_wait_budget)
                .await
        {
            return self.reject(
                PipelineError::CaptchaBusy,
                markdown::busy("busy waiting for CAPTCHA verification"),
            );
        }

        // Phase 4: local slot.
        if !self.local_gate.acquire(self.cfg.local_wait_budget).await {
            return self.reject(
                PipelineError::LocalBusy,
                markdown::busy("local concurrency slots exhausted, please retry shortly"),
            );
        }

        // Phase 5: global slot.
        let Some(lease) = self.coordinator.acquire(self.cfg.global_wait_budget).await else {
            self.local_gate.release();
            return self.reject(
                PipelineError::GlobalBusy,
                markdown::busy("host concurrency slots exhausted, please retry shortly"),
            );
        };

        let mut captcha_owned = false;
        let result = self.handle_with_slots(req, started, &mut captcha_owned).await;

        // Phase 14: release slots in reverse order.
        self.coordinator.release(lease).await;
        self.local_gate.release();
        if captcha_owned {
            self.captcha_gate.release().await;
        }

        result
    }

    async fn handle_with_slots(
        &self,
        req: SearchRequest,
        started: Instant,
        captcha_owned: &mut bool,
    ) -> String {
        let has_image = req.image_path.as_deref().is_some();

        // Phase 6: session acquisition.
        let preferred_id = if req.follow_up {
            req.session_id.clone()
        } else if req.session_id.is_some() {
            req.session_id.clone()
        } else {
            self.sessions.default_id().await
        };
        let is_ad_hoc_default = !req.follow_up && req.session_id.is_none();

        let (session_id, handle) = match self.sessions.get_or_create(preferred_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!("pipeline: failed to create session: {}", e);
                return markdown::failure(&format!("failed to start browser session: {}", e), false, false);
            }
        };
        if is_ad_hoc_default {
            self.sessions.set_default(session_id.clone()).await;
        }

        let mut session = handle.lock().await;
        session.search_count += 1;
        session.last_access = self.clock.now_ms();

        // Phase 7: budget check.
        let total_budget = if has_image {
            self.cfg.total_budget_image
        } else {
            self.cfg.total_budget_text
        };
        let elapsed = started.elapsed();
        let remaining = total_budget
            .checked_sub(elapsed)
            .and_then(|d| d.checked_sub(self.cfg.safety_margin));
        let Some(remaining) = remaining else {
            drop(session);
            return self.reject(
                PipelineError::QueueTooLong,
                markdown::busy("queue delay left no execution budget, please retry"),
            );
        };
        if remaining < self.cfg.min_execution {
            drop(session);
            return self.reject(
                PipelineError::QueueTooLong,
                markdown::busy("queue delay left no execution budget, please retry"),
            );
        }

        let execution_timeout = if has_image {
            self.cfg.execution_timeout_image
        } else {
            self.cfg.execution_timeout_text
        };
        let execution_deadline = execution_timeout.min(remaining);

        let grounding_term = grounding::gate_applies(&self.cfg, &req);
        let guarded_query = grounding_term
            .as_ref()
            .map(|_| grounding::wrap_guardrail(&self.cfg, &req.query))
            .unwrap_or_else(|| req.query.clone());

        let follow_up_active = req.follow_up && session.searcher.has_active_session();

        // Phase 8: execute.
        let exec_result = self
            .execute_with_deadline(
                &mut *session,
                follow_up_active,
                &guarded_query,
                req.language,
                req.image_path.as_deref(),
                execution_deadline,
            )
            .await;

        let mut result = match exec_result {
            Some(r) => r,
            None => {
                // Execution timeout: the owning session is closed so a
                // wedged page never pollutes a later call (spec §9).
                drop(session);
                self.sessions.close(&session_id).await;
                return self.reject(
                    PipelineError::ExecutionTimeout,
                    markdown::failure("execution deadline exceeded; please retry", false, false),
                );
            }
        };

        // Phase 10: CAPTCHA sentinel retry (checked before the keyword path
        // and before grounding, since a sentinel means "not really an
        // error", just "someone else already recovered, try again").
        if !result.success && result.error == CAPTCHA_HANDLED_BY_OTHER_REQUEST {
            if *captcha_owned {
                self.captcha_gate.release().await;
                *captcha_owned = false;
            }
            let retry_deadline = execution_deadline.saturating_sub(Instant::now().duration_since(started).min(execution_deadline));
            result = self
                .execute_with_deadline(
                    &mut *session,
                    follow_up_active,
                    &guarded_query,
                    req.language,
                    req.image_path.as_deref(),
                    retry_deadline.max(Duration::from_millis(1)),
                )
                .await
                .unwrap_or_else(|| SearchResult::failure(&req.query, "execution deadline exceeded"));
        }

        // Phase 9: policy. Strip any leaked guardrail text first.
        result.ai_answer = grounding::strip_guardrail(&self.cfg, &result.ai_answer);

        let mut forced_no_record = false;
        if result.success {
            if let Some(term) = &grounding_term {
                if grounding::should_force_no_record(&result.ai_answer, &result.sources, term) {
                    let retried = self
                        .try_unguarded_retry(&mut *session, &req, term, execution_deadline, started)
                        .await;
                    match retried {
                        Some(r) => result = r,
                        None => {
                            result.ai_answer = grounding::CANNED_NO_RECORD.to_string();
                            result.sources.clear();
                            result.error.clear();
                            forced_no_record = true;
                        }
                    }
                }
            }
        }
        result.sources = sanitize_sources(std::mem::take(&mut result.sources));

        // Phase 11: login-timeout latch. A keyword observed here means this
        // call's own execution hit the CAPTCHA/login wall — it becomes the
        // gate's owner for the rest of the call (there is nothing left to
        // drive in this pipeline, but ownership still gates every other
        // in-flight call until `release()` fires in `handle()`, matching
        // the teacher's narrowly-scoped `non_robot_search_lock`).
        if !result.success && matches_timeout_keywords(&result.error) {
            if !*captcha_owned
                && matches!(
                    self.captcha_gate.try_acquire(Duration::ZERO).await,
                    AcquireOutcome::Acquired
                )
            {
                *captcha_owned = true;
            }
            self.cooldown.trip().await;
            drop(session);
            return self.reject(
                PipelineError::LoginTimeout(result.error.clone()),
                markdown::failure(&result.error, true, true),
            );
        }

        drop(session);

        // Phase 13: session reset on forced grounding override.
        if forced_no_record && !req.follow_up {
            self.sessions.close(&session_id).await;
        }

        // Phase 12: shape.
        if result.success {
            let log_dir = self.cfg.log_dir.clone();
            let log_path: PathBuf = logging::today_log_path(&log_dir);
            let ctx = ResultContext {
                session_id: &session_id,
                log_path: &log_path,
                log_dir: &log_dir,
                log_retention_days: self.cfg.log_retention_days,
                follow_up: follow_up_active,
            };
            info!(
                "pipeline: search succeeded (session={}, follow_up={})",
                session_id, follow_up_active
            );
            markdown::success(&req.query, &result, &ctx)
        } else {
            self.reject(
                PipelineError::Browser(result.error.clone()),
                markdown::failure(&result.error, false, false),
            )
        }
    }

    async fn execute_with_deadline(
        &self,
        session: &mut crate::session::Session,
        follow_up: bool,
        query: &str,
        language: Language,
        image_path: Option<&str>,
        deadline: Duration,
    ) -> Option<SearchResult> {
        let fut = async {
            if follow_up {
                session.searcher.continue_conversation(query).await
            } else {
                session.searcher.search(query, language, image_path).await
            }
        };
        tokio::time::timeout(deadline, fut).await.ok()
    }

    /// Single unguarded retry (spec §4.F): only fires when the original
    /// query was wrapped and the policy gate triggered. Budget permitting.
    async fn try_unguarded_retry(
        &self,
        session: &mut crate::session::Session,
        req: &SearchRequest,
        term: &str,
        execution_deadline: Duration,
        started: Instant,
    ) -> Option<SearchResult> {
        let elapsed = started.elapsed();
        let remaining = execution_deadline.checked_sub(elapsed)?;
        if remaining < Duration::from_millis(500) {
            return None;
        }
        let raw_query = if grounding::is_tech_term_lookup(&req.query) {
            grounding::rephrase_for_retry(&req.query)
        } else {
            req.query.clone()
        };
        let retried = self
            .execute_with_deadline(session, false, &raw_query, req.language, None, remaining)
            .await?;
        if retried.success
            && !grounding::should_force_no_record(&retried.ai_answer, &retried.sources, term)
        {
            Some(retried)
        } else {
            None
        }
    }
}
