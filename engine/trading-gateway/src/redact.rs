//! Redaction of credential-like strings for logs and `Debug` output

const VISIBLE: usize = 4;

/// Show only the first and last four characters of a credential-like value.
///
/// Values too short to hide anything are fully masked.
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= VISIBLE * 2 {
        return "****".to_string();
    }

    let prefix: String = chars[..VISIBLE].iter().collect();
    let suffix: String = chars[chars.len() - VISIBLE..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

/// Truncate an upstream body before it is logged
pub fn truncate_for_log(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= 200 {
        return text.into_owned();
    }
    let head: String = text.chars().take(200).collect();
    format!("{}...", head)
}
