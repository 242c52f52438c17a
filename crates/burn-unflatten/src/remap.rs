use std::borrow::Cow;

use regex::Regex;

use crate::Error;

/// Rewrites record names before they are split into path segments.
///
/// Patterns are tried in insertion order and only the first matching one is applied.
///
/// # Examples
///
/// ```
/// use burn_unflatten::KeyRemapper;
///
/// let remapper = KeyRemapper::new()
///     .add_pattern(r"^blk\.", "layers.")?
///     .add_pattern(r"\.gamma$", ".weight")?;
///
/// assert_eq!(remapper.remap("blk.3.attn_q"), "layers.3.attn_q");
/// assert_eq!(remapper.remap("norm.gamma"), "norm.weight");
/// # Ok::<(), burn_unflatten::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyRemapper {
    patterns: Vec<(Regex, String)>,
}

impl KeyRemapper {
    /// Create a remapper without any pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern and its replacement.
    ///
    /// See [Regex](https://docs.rs/regex/latest/regex/#syntax) for the pattern syntax and
    /// [Replacement](https://docs.rs/regex/latest/regex/struct.Regex.html#method.replace) for
    /// the replacement syntax.
    pub fn add_pattern(mut self, pattern: &str, replacement: &str) -> Result<Self, Error> {
        let regex = Regex::new(pattern)?;
        self.patterns.push((regex, replacement.to_string()));
        Ok(self)
    }

    /// Whether no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Apply the first matching pattern to `name`.
    pub fn remap<'n>(&self, name: &'n str) -> Cow<'n, str> {
        for (pattern, replacement) in &self.patterns {
            if pattern.is_match(name) {
                return pattern.replace_all(name, replacement.as_str());
            }
        }

        Cow::Borrowed(name)
    }
}
