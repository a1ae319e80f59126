//! Browser Subsystem contract (spec §6): the `Searcher` trait is the seam
//! between the orchestration core and the actual AI-Mode page automation.
//! The exact click/scrape/CAPTCHA-detection heuristics are explicitly
//! out of scope for this crate (spec §1) — `ChromiumSearcher` below is a
//! best-effort real implementation of the *shape* of the contract, grounded
//! in the teacher's `scraping/browser_manager.rs` launch mechanics.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tracing::{debug, error, warn};
use url::Url;

use crate::core::types::{Language, SearchResult, SearchSource, CAPTCHA_HANDLED_BY_OTHER_REQUEST};

/// Abstract over the browser layer so the pipeline can be exercised against
/// a scriptable double in tests (spec §9 "Design Notes").
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &mut self,
        query: &str,
        language: Language,
        image_path: Option<&str>,
    ) -> SearchResult;

    async fn continue_conversation(&mut self, query: &str) -> SearchResult;

    fn has_active_session(&self) -> bool;

    async fn close(&mut self);
}

/// Constructs a fresh [`Searcher`] bound to a per-session data directory.
/// The Session Registry (spec §4.C) owns one of these per process.
#[async_trait]
pub trait SearcherFactory: Send + Sync {
    async fn create(&self, data_dir: &Path) -> anyhow::Result<Box<dyn Searcher>>;
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Resolution order: `CHROME_EXECUTABLE` env var, then a PATH scan, then
/// well-known per-OS install locations.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

fn build_config(exe: &str, data_dir: &Path) -> anyhow::Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(data_dir)
        .viewport(Viewport {
            width: 1280,
            height: 900,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1280, 900)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {}", e))
}

/// Case-insensitive substrings a page may carry when it is asking a human
/// to solve a challenge rather than returning search results. Distinct from
/// (but overlapping with) the cooldown latch's login-timeout keyword set —
/// this one classifies *pages*, that one classifies *error strings*.
const CHALLENGE_MARKERS: &[&str] = &[
    "unusual traffic",
    "verify you are human",
    "recaptcha",
    "r/sorry/index",
    "请完成验证",
    "人机验证",
];

fn google_family_host(host: &str) -> bool {
    host == "google.com" || host.ends_with(".google.com") || host.starts_with("www.google.")
}

/// Resolves a Google redirect URL (`/url?...&q=<target>` or `&url=<target>`)
/// to its target, or discards it if it is on a google-family host with no
/// resolvable redirect parameter (spec: SearchSource invariant).
fn resolve_source_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_string();
    if !google_family_host(&host) {
        return Some(raw.to_string());
    }
    let target = parsed
        .query_pairs()
        .find(|(k, _)| k == "q" || k == "url")
        .map(|(_, v)| v.into_owned())?;
    let resolved = Url::parse(&target).ok()?;
    if matches!(resolved.scheme(), "http" | "https") {
        Some(resolved.to_string())
    } else {
        None
    }
}

/// Enforces the `SearchSource` invariants from spec §3: http/https scheme,
/// no duplicate URLs, google-family hosts resolved or dropped, capped at 10.
pub fn sanitize_sources(sources: Vec<SearchSource>) -> Vec<SearchSource> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for mut s in sources {
        let Some(resolved) = resolve_source_url(&s.url) else {
            continue;
        };
        let Ok(parsed) = Url::parse(&resolved) else {
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            continue;
        }
        if !seen.insert(resolved.clone()) {
            continue;
        }
        s.url = resolved;
        out.push(s);
        if out.len() == 10 {
            break;
        }
    }
    out
}

/// A real, CDP-backed `Searcher`. Launches one headless browser + page per
/// session, bound to the session's own data directory so cookies persist
/// for the life of the session and are cleaned up with it.
pub struct ChromiumSearcher {
    browser: Browser,
    handler: Option<tokio::task::JoinHandle<()>>,
    page: Option<Page>,
}

impl ChromiumSearcher {
    pub async fn launch(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await.ok();
        let exe = find_chrome_executable()
            .ok_or_else(|| anyhow::anyhow!("no Chromium-family browser executable found"))?;
        let config = build_config(&exe, data_dir)?;
        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("chromium searcher: handler error: {}", e);
                }
            }
        });
        Ok(Self {
            browser,
            handler: Some(handler),
            page: None,
        })
    }

    fn search_url(query: &str, language: Language) -> String {
        let encoded = percent_encoding::utf8_percent_encode(
            query,
            percent_encoding::NON_ALPHANUMERIC,
        );
        format!(
            "https://www.google.com/search?q={}&udm=50&hl={}",
            encoded,
            &language.as_code()[..2]
        )
    }

    async fn classify_and_scrape(page: &Page, query: &str) -> SearchResult {
        let body_text: String = page
            .evaluate("document.body ? document.body.innerText.slice(0, 2000) : ''")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default();
        let lower = body_text.to_lowercase();

        if CHALLENGE_MARKERS.iter().any(|m| lower.contains(m)) {
            return SearchResult::failure(
                query,
                "login-required: human verification challenge detected",
            );
        }

        let answer: String = page
            .evaluate(
                "(() => { \
                   const el = document.querySelector('[data-attrid=\"wa:/description\"], .LGOjhe, #search'); \
                   return el ? el.innerText : ''; \
                 })()",
            )
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default();

        let raw_sources: Vec<(String, String, String)> = page
            .evaluate(
                "Array.from(document.querySelectorAll('a[href^=\"/url?\"], a[href^=\"http\"]'))\
                   .slice(0, 20)\
                   .map(a => [a.href, (a.innerText || '').slice(0,120), ''])",
            )
            .await
            .ok()
            .and_then(|v| v.into_value::<Vec<(String, String, String)>>().ok())
            .unwrap_or_default();

        let sources = sanitize_sources(
            raw_sources
                .into_iter()
                .map(|(url, title, snippet)| SearchSource {
                    title,
                    url,
                    snippet,
                })
                .collect(),
        );

        if answer.trim().is_empty() {
            return SearchResult::failure(query, "browser subsystem error: empty AI answer");
        }

        SearchResult {
            success: true,
            query: query.to_string(),
            ai_answer: answer.trim().to_string(),
            sources,
            error: String::new(),
        }
    }
}

#[async_trait]
impl Searcher for ChromiumSearcher {
    async fn search(
        &mut self,
        query: &str,
        language: Language,
        image_path: Option<&str>,
    ) -> SearchResult {
        let page = match self.browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => return SearchResult::failure(query, format!("failed to open page: {}", e)),
        };

        if let Some(path) = image_path {
            debug!("chromium searcher: image upload requested for {}", path);
            // Image upload automation is a browser-subsystem scraping detail
            // this crate treats as out of scope (spec §1); the hook exists
            // so the contract shape matches spec §6 exactly.
        }

        if let Err(e) = page.goto(Self::search_url(query, language)).await {
            return SearchResult::failure(query, format!("navigation failed: {}", e));
        }
        if let Err(e) = page.wait_for_navigation().await {
            warn!("chromium searcher: wait_for_navigation failed: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let result = Self::classify_and_scrape(&page, query).await;
        self.page = Some(page);
        result
    }

    async fn continue_conversation(&mut self, query: &str) -> SearchResult {
        let Some(page) = &self.page else {
            return SearchResult::failure(query, "no active session to continue");
        };
        let script = format!(
            "(() => {{ const box = document.querySelector('textarea, input[type=\"text\"]'); \
               if (!box) return false; \
               box.focus(); box.value = {:?}; \
               box.dispatchEvent(new Event('input', {{bubbles:true}})); \
               const form = box.closest('form'); \
               if (form) form.requestSubmit ? form.requestSubmit() : form.submit(); \
               return true; \
             }})()",
            query
        );
        if let Err(e) = page.evaluate(script).await {
            return SearchResult::failure(query, format!("follow-up submit failed: {}", e));
        }
        if let Err(e) = page.wait_for_navigation().await {
            warn!("chromium searcher: follow-up wait_for_navigation failed: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;
        Self::classify_and_scrape(page, query).await
    }

    fn has_active_session(&self) -> bool {
        self.page.is_some()
    }

    async fn close(&mut self) {
        if let Some(h) = self.handler.take() {
            h.abort();
        }
        if let Err(e) = self.browser.close().await {
            warn!("chromium searcher: close error (non-fatal): {}", e);
        }
    }
}

pub struct ChromiumSearcherFactory;

#[async_trait]
impl SearcherFactory for ChromiumSearcherFactory {
    async fn create(&self, data_dir: &Path) -> anyhow::Result<Box<dyn Searcher>> {
        Ok(Box::new(ChromiumSearcher::launch(data_dir).await?))
    }
}

/// A scriptable test double: each call to `search`/`continue_conversation`
/// pops the next queued response (or repeats the last one if the queue is
/// drained), so tests can seam the pipeline exactly as spec §9 prescribes.
pub struct FakeSearcher {
    pub responses: std::collections::VecDeque<SearchResult>,
    pub last: Option<SearchResult>,
    pub active: bool,
    pub closed: bool,
}

impl FakeSearcher {
    pub fn new(responses: Vec<SearchResult>) -> Self {
        Self {
            responses: responses.into(),
            last: None,
            active: false,
            closed: false,
        }
    }

    pub fn single(result: SearchResult) -> Self {
        Self::new(vec![result])
    }

    fn next(&mut self) -> SearchResult {
        let result = self.responses.pop_front().or_else(|| self.last.clone());
        let result = result.unwrap_or_else(|| {
            SearchResult::failure("", CAPTCHA_HANDLED_BY_OTHER_REQUEST.to_string())
        });
        self.last = Some(result.clone());
        self.active = true;
        result
    }
}

#[async_trait]
impl Searcher for FakeSearcher {
    async fn search(
        &mut self,
        _query: &str,
        _language: Language,
        _image_path: Option<&str>,
    ) -> SearchResult {
        self.next()
    }

    async fn continue_conversation(&mut self, _query: &str) -> SearchResult {
        self.next()
    }

    fn has_active_session(&self) -> bool {
        self.active && !self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
        self.active = false;
    }
}

pub struct FakeSearcherFactory {
    pub make: Box<dyn Fn() -> FakeSearcher + Send + Sync>,
}

#[async_trait]
impl SearcherFactory for FakeSearcherFactory {
    async fn create(&self, _data_dir: &Path) -> anyhow::Result<Box<dyn Searcher>> {
        Ok(Box::new((self.make)()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_google_redirect_target() {
        let raw = "https://www.google.com/url?q=https://example.com/article&sa=U";
        assert_eq!(
            resolve_source_url(raw),
            Some("https://example.com/article".to_string())
        );
    }

    #[test]
    fn drops_google_host_with_no_redirect_param() {
        assert_eq!(resolve_source_url("https://www.google.com/search?q=x"), None);
    }

    #[test]
    fn passes_through_non_google_https_url() {
        assert_eq!(
            resolve_source_url("https://example.com/a"),
            Some("https://example.com/a".to_string())
        );
    }

    #[test]
    fn sanitize_dedupes_and_caps_at_ten() {
        let mut sources = Vec::new();
        for i in 0..15 {
            sources.push(SearchSource {
                title: format!("t{}", i),
                url: format!("https://example.com/{}", i % 5),
                snippet: String::new(),
            });
        }
        let cleaned = sanitize_sources(sources);
        assert_eq!(cleaned.len(), 5);
    }

    #[test]
    fn sanitize_rejects_non_http_scheme() {
        let sources = vec![SearchSource {
            title: "x".into(),
            url: "javascript:alert(1)".into(),
            snippet: String::new(),
        }];
        assert!(sanitize_sources(sources).is_empty());
    }
}
