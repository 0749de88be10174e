//! Masking for secrets that show up in diagnostics.

const VISIBLE_PREFIX: usize = 4;
const MIN_MASKABLE_LEN: usize = 12;

/// Render a secret for display: a short prefix for long values, nothing for short ones.
pub fn mask_secret(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_MASKABLE_LEN {
        return "********".to_string();
    }
    let prefix: String = trimmed.chars().take(VISIBLE_PREFIX).collect();
    format!("{prefix}********")
}

/// Presence report for an optional setting.
pub fn describe_presence(value: Option<&str>, secret: bool) -> String {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => "missing".to_string(),
        Some(value) if secret => format!("set ({})", mask_secret(value)),
        Some(value) => format!("set ({value})"),
    }
}
