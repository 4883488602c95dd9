/// True when an inbound message is an opt-out request.
///
/// Matches the whole message against `keywords`, ignoring case, surrounding
/// whitespace and trailing punctuation ("Stop!" opts out, "please stop the
/// calls" does not).
pub fn is_opt_out_message(body: &str, keywords: &[String]) -> bool {
    let normalized = body
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    keywords
        .iter()
        .any(|k| k.trim().eq_ignore_ascii_case(&normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::config::OptOutConfig;

    #[test]
    fn test_keywords_match_whole_message() {
        let keywords = OptOutConfig::default().keywords;
        assert!(is_opt_out_message("STOP", &keywords));
        assert!(is_opt_out_message("  Unsubscribe \n", &keywords));
        assert!(is_opt_out_message("stop!", &keywords));
        assert!(is_opt_out_message("opt-out", &keywords));
        assert!(!is_opt_out_message("please stop the calls", &keywords));
        assert!(!is_opt_out_message("", &keywords));
        assert!(!is_opt_out_message("stopp", &keywords));
    }
}
