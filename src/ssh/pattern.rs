//! Host pattern matching for `Host` lines
//!
//! Supports `*` (any run of characters), `?` (exactly one character) and
//! `!` negation. Matching is ASCII case-insensitive, like OpenSSH.

/// Check whether `host` is selected by a `Host` line's pattern list.
///
/// A matching negated pattern rejects the whole line, whatever else matches.
pub(crate) fn matches_host_patterns(host: &str, patterns: &[String]) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(host, negated) {
                return false;
            }
        } else if wildcard_match(host, pattern) {
            matched = true;
        }
    }
    matched
}

/// Match `text` against a single glob pattern
pub(crate) fn wildcard_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last `*` seen and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, star_t)) => {
                    p = star + 1;
                    t = star_t + 1;
                    backtrack = Some((star, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
