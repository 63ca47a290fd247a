use crate::error::{AppError, AppResult};

/// Trim, bound and HTML-escape message content. Empty content is only
/// accepted when the message carries attachments.
pub fn validate_content(raw: &str, max_chars: usize, has_attachments: bool) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() && !has_attachments {
        return Err(AppError::Validation("message content is empty".into()));
    }
    if trimmed.chars().count() > max_chars {
        return Err(AppError::Validation(format!(
            "message content exceeds {max_chars} characters"
        )));
    }
    Ok(escape_html(trimmed))
}

/// Search terms are matched against escaped content, so they get the same
/// treatment.
pub fn normalize_query(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("search query is empty".into()));
    }
    Ok(escape_html(trimmed).to_lowercase())
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_escapes() {
        assert_eq!(
            validate_content("  <b>hi</b> & 'bye'  ", 100, false).unwrap(),
            "&lt;b&gt;hi&lt;/b&gt; &amp; &#x27;bye&#x27;"
        );
    }

    #[test]
    fn empty_content_needs_attachments() {
        assert!(validate_content("   ", 100, false).is_err());
        assert_eq!(validate_content("   ", 100, true).unwrap(), "");
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let ten_emoji = "🎉".repeat(10);
        assert!(validate_content(&ten_emoji, 10, false).is_ok());
        assert!(validate_content(&format!("{ten_emoji}!"), 10, false).is_err());
    }

    #[test]
    fn query_is_escaped_and_lowercased() {
        assert_eq!(normalize_query(" Tom & Jerry ").unwrap(), "tom &amp; jerry");
        assert!(normalize_query("  ").is_err());
    }
}
