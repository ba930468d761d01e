/// Substring scan applied to submitted source before it touches the filesystem
///
/// Matching is deliberately coarse: any occurrence of a banned token anywhere
/// in the text rejects the submission, comments and string literals included.
pub struct SecurityScanner {
    banned_tokens: Vec<String>,
}

impl SecurityScanner {
    pub fn new(banned_tokens: Vec<String>) -> Self {
        Self { banned_tokens }
    }

    /// Returns the banned token occurring earliest in `source`, if any
    pub fn scan(&self, source: &str) -> Option<&str> {
        self.banned_tokens
            .iter()
            .filter_map(|token| source.find(token).map(|pos| (pos, token.as_str())))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, token)| token)
    }
}
