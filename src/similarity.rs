/// Scores how alike two listing descriptions are, in `[0, 1]`.
pub trait ContentComparator: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Normalized Levenshtein over whitespace-collapsed, lowercased text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevenshteinComparator;

impl ContentComparator for LevenshteinComparator {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize(a);
        let b = normalize(b);
        match (a.is_empty(), b.is_empty()) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.0,
            _ => strsim::normalized_levenshtein(&a, &b),
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
