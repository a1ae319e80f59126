use serde::{Deserialize, Serialize};

/// The six AI-Mode UI locales the browser layer can be driven in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "zh-CN")]
    ZhCn,
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "ja-JP")]
    JaJp,
    #[serde(rename = "ko-KR")]
    KoKr,
    #[serde(rename = "de-DE")]
    DeDe,
    #[serde(rename = "fr-FR")]
    FrFr,
}

impl Default for Language {
    fn default() -> Self {
        Language::ZhCn
    }
}

impl Language {
    pub fn as_code(&self) -> &'static str {
        match self {
            Language::ZhCn => "zh-CN",
            Language::EnUs => "en-US",
            Language::JaJp => "ja-JP",
            Language::KoKr => "ko-KR",
            Language::DeDe => "de-DE",
            Language::FrFr => "fr-FR",
        }
    }
}

/// Raw arguments for the `search` MCP tool, as received over the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub follow_up: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub create_image: Option<bool>,
}

/// One citation surfaced alongside an AI answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// The normalized outcome of a single browser-subsystem call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub success: bool,
    pub query: String,
    pub ai_answer: String,
    pub sources: Vec<SearchSource>,
    pub error: String,
}

impl SearchResult {
    pub fn failure(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            query: query.into(),
            ai_answer: String::new(),
            sources: Vec::new(),
            error: error.into(),
        }
    }
}

/// Sentinel the Browser Subsystem returns in `SearchResult::error` to mean
/// "another in-flight request is already driving CAPTCHA recovery; retry me".
pub const CAPTCHA_HANDLED_BY_OTHER_REQUEST: &str = "CAPTCHA_HANDLED_BY_OTHER_REQUEST";
