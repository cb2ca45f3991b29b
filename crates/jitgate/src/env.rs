use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static JITGATE_TRACE: OnceLock<bool> = OnceLock::new();

const DEFAULT_CACHE_DIR: &str = ".cache/jitgate";
const DEFAULT_COMPILER: &str = "jitgate-aot";

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty_var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Root of the persistent kernel cache (`JITGATE_CACHE_DIR`).
pub fn cache_dir() -> PathBuf {
    non_empty_var("JITGATE_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
}

/// Binary invoked by [`crate::compiler::ExternalCompiler`] (`JITGATE_COMPILER`).
pub fn compiler_binary() -> String {
    non_empty_var("JITGATE_COMPILER").unwrap_or_else(|| DEFAULT_COMPILER.to_string())
}

/// Whether compile requests ask the compiler for traced output (`JITGATE_TRACE`).
pub fn trace_enabled() -> bool {
    *JITGATE_TRACE.get_or_init(|| match env::var("JITGATE_TRACE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
