//! Glob-style instance name matching.
//!
//! `?` matches one character, `*` matches any run (including none), and a
//! leading `^` inverts the result. Matching is anchored and case-insensitive.

/// Parsed wildcard pattern, reusable across many candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardMatcher {
    pattern: Vec<char>,
    negated: bool,
}

impl WildcardMatcher {
    pub fn new(pattern: &str) -> Self {
        let (negated, body) = match pattern.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        Self {
            pattern: body.chars().flat_map(char::to_lowercase).collect(),
            negated,
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let text: Vec<char> = candidate.chars().flat_map(char::to_lowercase).collect();
        glob_match(&text, &self.pattern) != self.negated
    }

    /// Keep the candidates that match, preserving their order.
    pub fn filter<I, S>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        candidates
            .into_iter()
            .filter(|c| self.matches(c.as_ref()))
            .map(|c| c.as_ref().to_string())
            .collect()
    }
}

/// One-shot match of `candidate` against `pattern`.
pub fn matches(candidate: &str, pattern: &str) -> bool {
    WildcardMatcher::new(pattern).matches(candidate)
}

// Greedy scan that remembers the last `*` and backtracks to it on mismatch.
fn glob_match(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
