//! Grounding Policy (spec §4.F): replaces an ungrounded tech-term answer
//! with a canned "no verifiable record" response when neither an
//! authoritative source nor a substantive answer backs it up.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::core::config::CoreConfig;
use crate::core::types::{SearchRequest, SearchSource};

pub const CANNED_NO_RECORD: &str = "该词条在当前技术语料库和实时搜索中无可验证记录。\n\n说明：当前仅表示未检索到可验证权威来源，不等于该词条绝对不存在。";

/// A zero-width marker appended to a guarded query so the pipeline can
/// recognize (and strip) the wrapped prompt even after a round trip
/// through the browser layer.
const GUARDRAIL_MARKER: &str = "\u{200b}GROUNDING_GUARD\u{200b}";

fn lookup_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(what\s+is|define|definition\s+of)\b|是什么$|什么意思$|含义$|定义$")
            .expect("static regex")
    })
}

fn bare_identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.+#-]{1,40}$").expect("static regex"))
}

fn depunctuate(query: &str) -> String {
    query
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c == '？' || c == '。' || c == '，')
        .trim()
        .to_string()
}

/// Deterministic predicate: does this query read as a tech-term lookup
/// ("X是什么", "what is X", a bare identifier token)?
pub fn is_tech_term_lookup(query: &str) -> bool {
    let trimmed = depunctuate(query);
    if trimmed.is_empty() {
        return false;
    }
    if lookup_hint_re().is_match(&trimmed) {
        return true;
    }
    !trimmed.contains(char::is_whitespace) && bare_identifier_re().is_match(&trimmed)
}

/// Extracts the bare term a tech-term-lookup query is asking about, for use
/// by the authority predicate's official-site heuristic and by the
/// single-retry rephrasing.
pub fn extract_term(query: &str) -> String {
    let trimmed = depunctuate(query);
    let lower = trimmed.to_lowercase();
    for prefix in ["what is ", "define ", "definition of "] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            return trimmed[trimmed.len() - rest.len()..].trim().to_string();
        }
    }
    for suffix in ["是什么", "什么意思", "含义", "定义"] {
        if let Some(rest) = trimmed.strip_suffix(suffix) {
            return rest.trim().to_string();
        }
    }
    trimmed
}

const STANDARDS_BODIES: &[&str] = &[
    "rfc-editor.org",
    "ietf.org",
    "w3.org",
    "iso.org",
    "ecma-international.org",
    "whatwg.org",
];

const PACKAGE_REGISTRIES: &[&str] = &[
    "npmjs.com",
    "pypi.org",
    "crates.io",
    "pkg.go.dev",
    "rubygems.org",
    "nuget.org",
    "packagist.org",
    "pub.dev",
    "mvnrepository.com",
    "search.maven.org",
];

const TECH_PLATFORMS: &[&str] = &["dev.to", "medium.com", "wikipedia.org"];

const STACK_EXCHANGE_FAMILY: &[&str] = &["stackoverflow.com", "stackexchange.com", "superuser.com"];

fn host_base(host: &str) -> &str {
    host.trim_start_matches("www.")
}

fn matches_any_suffix(host: &str, list: &[&str]) -> bool {
    list.iter().any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Authority predicate (spec §4.F): is `source` an authoritative reference
/// for `term`? Stack Exchange family is explicitly disallowed as sole
/// authority, so it is never treated as a match here.
pub fn is_authoritative_source(source: &SearchSource, term: &str) -> bool {
    let Ok(url) = Url::parse(&source.url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();

    if matches_any_suffix(&host, STACK_EXCHANGE_FAMILY) {
        return false;
    }
    if host == "github.com" || host.ends_with(".github.com") || host.ends_with(".github.io") {
        return true;
    }
    if matches_any_suffix(&host, STANDARDS_BODIES) {
        return true;
    }
    if matches_any_suffix(&host, PACKAGE_REGISTRIES) {
        return true;
    }
    if matches_any_suffix(&host, TECH_PLATFORMS) {
        return true;
    }
    if host.starts_with("docs.") || host == "developer.mozilla.org" || host.ends_with(".readthedocs.io") {
        return true;
    }
    let path = url.path().to_lowercase();
    if path.contains("/docs/") || path.contains("/reference/") || path.contains("/api/") {
        return true;
    }

    let term_lower = term.to_lowercase();
    let term_norm: String = term_lower.chars().filter(|c| c.is_alphanumeric()).collect();
    if !term_norm.is_empty() {
        let host_norm: String = host_base(&host).chars().filter(|c| c.is_alphanumeric()).collect();
        if host_norm.contains(&term_norm) {
            return true;
        }
    }

    false
}

/// "Substantive-answer" predicate: answer length > 200 chars AND ≥1 source.
pub fn is_substantive_answer(answer: &str, sources: &[SearchSource]) -> bool {
    answer.chars().count() > 200 && !sources.is_empty()
}

/// Whether the pipeline's policy gate is even in play for this request
/// (spec §4.F preconditions i–iv, minus the authority/substantive check
/// which requires the result).
pub fn gate_applies(cfg: &CoreConfig, req: &SearchRequest) -> Option<String> {
    if !cfg.strict_grounding || req.follow_up || req.image_path.is_some() {
        return None;
    }
    if !is_tech_term_lookup(&req.query) {
        return None;
    }
    Some(extract_term(&req.query))
}

/// True when no authoritative source and no substantive answer back the
/// result — i.e. the canned no-record response should replace it.
pub fn should_force_no_record(answer: &str, sources: &[SearchSource], term: &str) -> bool {
    let has_authority = sources.iter().any(|s| is_authoritative_source(s, term));
    !has_authority && !is_substantive_answer(answer, sources)
}

/// Wraps a query with the anti-hallucination guardrail prompt and a marker
/// so the pipeline can later strip it from a leaked answer.
pub fn wrap_guardrail(cfg: &CoreConfig, query: &str) -> String {
    format!("{}{} {}", GUARDRAIL_MARKER, cfg.guardrail_prompt, query)
}

pub fn was_guarded(query: &str) -> bool {
    query.starts_with(GUARDRAIL_MARKER)
}

/// Strips the guardrail prompt (and its marker) from a visible answer if it
/// leaked through, per spec §4.G phase 9.
pub fn strip_guardrail(cfg: &CoreConfig, answer: &str) -> String {
    let mut cleaned = answer.replace(GUARDRAIL_MARKER, "");
    if let Some(idx) = cleaned.find(cfg.guardrail_prompt.as_str()) {
        cleaned.replace_range(idx..idx + cfg.guardrail_prompt.len(), "");
    }
    cleaned.trim().to_string()
}

/// Rephrases a bare-token query as a natural question for the single
/// unguarded retry (spec §4.F).
pub fn rephrase_for_retry(query: &str) -> String {
    let term = extract_term(query);
    if bare_identifier_re().is_match(&term) {
        format!("What is {}?", term)
    } else {
        query.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bare_identifier_as_lookup() {
        assert!(is_tech_term_lookup("Quizzlex"));
        assert!(is_tech_term_lookup("kubectl"));
    }

    #[test]
    fn classifies_english_what_is_pattern() {
        assert!(is_tech_term_lookup("what is HTTP/3"));
        assert!(is_tech_term_lookup("What is QUIC"));
    }

    #[test]
    fn classifies_chinese_lookup_suffixes() {
        assert!(is_tech_term_lookup("Rust是什么"));
        assert!(is_tech_term_lookup("容器编排什么意思"));
    }

    #[test]
    fn rejects_ordinary_sentences() {
        assert!(!is_tech_term_lookup("explain QUIC handshake steps in detail"));
        assert!(!is_tech_term_lookup("how do I reverse a linked list"));
    }

    #[test]
    fn authority_table_github_and_standards() {
        let gh = SearchSource {
            title: "".into(),
            url: "https://github.com/rust-lang/rust".into(),
            snippet: "".into(),
        };
        assert!(is_authoritative_source(&gh, "rust"));

        let rfc = SearchSource {
            title: "".into(),
            url: "https://www.rfc-editor.org/rfc/rfc9114".into(),
            snippet: "".into(),
        };
        assert!(is_authoritative_source(&rfc, "http3"));
    }

    #[test]
    fn stack_exchange_is_never_sole_authority() {
        let so = SearchSource {
            title: "".into(),
            url: "https://stackoverflow.com/questions/123/what-is-quic".into(),
            snippet: "".into(),
        };
        assert!(!is_authoritative_source(&so, "quic"));
    }

    #[test]
    fn official_site_heuristic_matches_host_containing_term() {
        let site = SearchSource {
            title: "".into(),
            url: "https://kubernetes.io/docs/concepts/".into(),
            snippet: "".into(),
        };
        assert!(is_authoritative_source(&site, "kubernetes"));
    }

    #[test]
    fn substantive_requires_length_and_source() {
        let long_answer = "x".repeat(201);
        assert!(!is_substantive_answer(&long_answer, &[]));
        let source = vec![SearchSource {
            title: "".into(),
            url: "https://example.com".into(),
            snippet: "".into(),
        }];
        assert!(is_substantive_answer(&long_answer, &source));
        assert!(!is_substantive_answer("short", &source));
    }

    #[test]
    fn guardrail_wrap_and_strip_round_trip() {
        let cfg = CoreConfig::resolve();
        let wrapped = wrap_guardrail(&cfg, "Quizzlex");
        assert!(was_guarded(&wrapped));
        let leaked_answer = format!("{} some model output", wrapped);
        let stripped = strip_guardrail(&cfg, &leaked_answer);
        assert_eq!(stripped, "some model output");
    }

    #[test]
    fn retry_rephrases_bare_token_as_question() {
        assert_eq!(rephrase_for_retry("Quizzlex"), "What is Quizzlex?");
    }
}
