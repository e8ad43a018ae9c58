//! Append-only output accumulator.

/// Collects output fragments in delivery order.
///
/// Fragments are opaque: they are concatenated as-is, never split or joined
/// on line boundaries, and never deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputAggregator {
    fragments: Vec<String>,
    text: String,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: impl Into<String>) {
        let fragment = fragment.into();
        self.text.push_str(&fragment);
        self.fragments.push(fragment);
    }

    /// Everything received so far, concatenated.
    pub fn snapshot(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn reset(&mut self) {
        self.fragments.clear();
        self.text.clear();
    }
}
