/// Round to 2 decimal places, the precision every derived number is stored at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Strip scheme/host, query string and fragment so the same match link
/// always normalises to the same path.
pub fn normalize_path(href: &str) -> String {
    let href = href.trim();
    let without_host = match href.find("://") {
        Some(idx) => {
            let rest = &href[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => href,
    };
    let end = without_host
        .find(|c| c == '?' || c == '#')
        .unwrap_or(without_host.len());
    without_host[..end].to_string()
}

/// External match id from a match path: `/123456/slug` or `/match/123456/slug`.
pub fn external_match_id(path: &str) -> Option<String> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let first = parts.next()?;
    let candidate = if first == "match" { parts.next()? } else { first };
    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Join a source-relative path onto the configured base url.
pub fn absolute_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Single-digit tokens that stand alone between non-word characters.
pub fn isolated_single_digits(text: &str) -> Vec<u32> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|tok| tok.len() == 1)
        .filter_map(|tok| tok.chars().next()?.to_digit(10))
        .collect()
}

/// Validate team name format
pub fn validate_team_name(name: &str) -> bool {
    name.trim().chars().count() >= 2 && name.len() <= 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(16.299999999), 16.3);
        assert_eq!(round2(2.346), 2.35);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/598939/fnatic-vs-navi?tab=stats#x"), "/598939/fnatic-vs-navi");
        assert_eq!(normalize_path("https://www.vlr.gg/598939/a-vs-b"), "/598939/a-vs-b");
        assert_eq!(normalize_path("https://www.vlr.gg"), "/");
    }

    #[test]
    fn test_external_match_id() {
        assert_eq!(external_match_id("/598939/fnatic-vs-navi").as_deref(), Some("598939"));
        assert_eq!(external_match_id("/match/598939/x").as_deref(), Some("598939"));
        assert_eq!(external_match_id("/news/123/headline"), None);
        assert_eq!(external_match_id("/"), None);
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("https://www.vlr.gg/", "/1/x"), "https://www.vlr.gg/1/x");
        assert_eq!(absolute_url("https://www.vlr.gg", "1/x"), "https://www.vlr.gg/1/x");
        assert_eq!(absolute_url("https://a", "http://b/c"), "http://b/c");
    }

    #[test]
    fn test_isolated_single_digits_skip_dates_and_words() {
        assert_eq!(isolated_single_digits("2 : 1"), vec![2, 1]);
        assert_eq!(isolated_single_digits("2024-01-05 final 3:0"), vec![3, 0]);
        assert_eq!(isolated_single_digits("map1 x2"), Vec::<u32>::new());
    }

    #[test]
    fn test_validate_team_name() {
        assert!(validate_team_name("G2"));
        assert!(!validate_team_name("X"));
        assert!(!validate_team_name("  "));
    }
}
