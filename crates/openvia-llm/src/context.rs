//! Static context-window estimates by model name.
//!
//! Adapters publish `max_context_tokens` from this table. The orchestrator
//! does not yet enforce the limit but may consult it; the numbers are
//! deliberately conservative estimates, not provider guarantees.

/// Fallback context window for unknown models.
const DEFAULT_CONTEXT_TOKENS: u32 = 128_000;

/// Estimate the context window for a model from its name.
pub fn max_context_tokens(model: &str) -> u32 {
    let m = model.to_ascii_lowercase();

    if m.contains("gemini-1.5-pro") {
        2_000_000
    } else if m.contains("gemini") {
        1_000_000
    } else if m.contains("gpt-4.1") {
        1_000_000
    } else if m.contains("claude") || m.starts_with("o3") || m.starts_with("o4") {
        200_000
    } else if m.contains("qwen") || m.contains("moonshot") || m.contains("kimi") {
        131_072
    } else if m.contains("deepseek") {
        65_536
    } else if m.contains("gpt-3.5") {
        16_384
    } else {
        DEFAULT_CONTEXT_TOKENS
    }
}
