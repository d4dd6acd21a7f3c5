use glob::{MatchOptions, Pattern};
use tracing::debug;

/// Rule suffix selecting every descendant of a directory.
pub const DESCENDANTS_SUFFIX: &str = "/*";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct ExclusionRule {
    raw: String,
    glob: Option<Pattern>,
}

impl ExclusionRule {
    fn parse(raw: &str) -> Self {
        // `**` carries no recursive meaning here; it is just a wildcard run.
        let mut collapsed = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == '*' && collapsed.ends_with('*') {
                continue;
            }
            collapsed.push(c);
        }

        let glob = match Pattern::new(&collapsed) {
            Ok(p) => Some(p),
            Err(e) => {
                debug!("Exclusion pattern {:?} is not a valid glob: {}", raw, e);
                None
            }
        };

        Self {
            raw: raw.to_string(),
            glob,
        }
    }

    fn matches(&self, path: &str) -> bool {
        if self
            .glob
            .as_ref()
            .is_some_and(|g| g.matches_with(path, MATCH_OPTIONS))
        {
            return true;
        }

        if let Some(dir) = self.raw.strip_suffix(DESCENDANTS_SUFFIX) {
            if path
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with('/'))
            {
                return true;
            }
        }

        path == self.raw
    }
}

/// Ordered set of exclusion patterns with union semantics.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: Vec<ExclusionRule>,
}

impl ExclusionRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: patterns
                .into_iter()
                .map(|p| ExclusionRule::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.raw.as_str())
    }

    /// A path is excluded when any rule matches. Malformed globs only lose
    /// their glob step; the prefix and literal steps still apply.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.rules.iter().any(|r| r.matches(path))
    }
}

/// One-shot form for callers holding raw pattern strings.
pub fn is_excluded<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    ExclusionRules::new(patterns).is_excluded(path)
}
