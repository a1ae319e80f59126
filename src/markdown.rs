//! Result shaping contract (spec §6): renders the pipeline's outcome into
//! the Markdown body the MCP client receives. Every branch here is a pure
//! function of already-computed state — no gate or registry mutation
//! happens past this point.

use std::path::Path;

use crate::core::types::{SearchResult, SearchSource};

pub struct ResultContext<'a> {
    pub session_id: &'a str,
    pub log_path: &'a Path,
    pub log_dir: &'a Path,
    pub log_retention_days: u32,
    pub follow_up: bool,
}

fn sources_block(sources: &[SearchSource]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let shown = sources.iter().take(5);
    let list = shown
        .enumerate()
        .map(|(i, s)| format!("{}. [{}]({})", i + 1, s.title, s.url))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n### 来源 ({} 个)\n\n{}\n", sources.len().min(10), list)
}

/// Success Markdown body (spec §6).
pub fn success(query: &str, result: &SearchResult, ctx: &ResultContext) -> String {
    let header = if ctx.follow_up {
        "## AI 追问结果"
    } else {
        "## AI 搜索结果"
    };
    let query_line = if query.trim().is_empty() {
        "(仅图片输入)".to_string()
    } else {
        query.to_string()
    };

    format!(
        "{header}\n**查询**: {query}\n\n### AI 回答\n\n{answer}\n{sources}\n---\n\
         🔑 **会话 ID**: `{session_id}`\n\
         🧾 **运行日志**: `{log_path}`\n\
         📁 **日志目录**: `{log_dir}`（默认保留 {retention} 天）\n\n\
         💡 **提示**: 如需深入了解，可以设置 `follow_up: true` 并传入 `session_id: \"{session_id}\"` 进行追问，AI 会在当前对话上下文中继续回答。",
        header = header,
        query = query_line,
        answer = result.ai_answer,
        sources = sources_block(&result.sources),
        session_id = ctx.session_id,
        log_path = ctx.log_path.display(),
        log_dir = ctx.log_dir.display(),
        retention = ctx.log_retention_days,
    )
}

/// Failure Markdown body. `auth_related` selects between a setup-command
/// hint and a generic retry/network hint.
pub fn failure(error: &str, auth_related: bool, urgent: bool) -> String {
    let header = if urgent { "## ❌ 搜索失败" } else { "## 搜索失败" };
    let hint = if auth_related {
        "需要人工完成登录/验证。请运行 `huge-ai-search-mcp --setup` 或对应的设置脚本完成一次性登录后重试。"
    } else {
        "这通常是网络抖动或页面结构变化导致的。请稍后重试；如果持续失败，请检查网络连通性。"
    };
    format!(
        "{header}\n**错误**: {error}\n\n### 🔧 解决方案\n\n{hint}",
        header = header,
        error = error,
        hint = hint,
    )
}

/// Cooldown short-circuit Markdown (spec §4.E / §6).
pub fn cooldown(remaining_secs: u64) -> String {
    let minutes = remaining_secs / 60;
    let seconds = remaining_secs % 60;
    format!(
        "## ⏸️ Patchright 浏览器工具暂时不可用\n\n最近一次登录/验证超时后，工具进入冷却期，\
         预计还需等待 **{minutes} 分 {seconds} 秒**。\n\n在此期间可以：\n\
         - 稍后重新调用 `search`；\n\
         - 先使用其他工具或你已掌握的信息继续工作。",
        minutes = minutes,
        seconds = seconds,
    )
}

/// Busy/capacity Markdown for local-slot, global-slot, CAPTCHA-wait and
/// queue-too-long outcomes (spec §7 "Busy/capacity").
pub fn busy(scope: &str) -> String {
    format!(
        "## 搜索繁忙\n**错误**: {scope}\n\n### 🔧 解决方案\n\n当前并发已达上限，请稍后重试这次调用。",
        scope = scope,
    )
}

/// Input-error Markdown (spec §7 "Input error").
pub fn input_error(message: &str) -> String {
    format!(
        "## 搜索失败\n**错误**: {message}\n\n### 🔧 解决方案\n\n请提供非空的 `query` 或 `image_path`。",
        message = message,
    )
}
