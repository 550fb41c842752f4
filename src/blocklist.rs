use anyhow::{Context, Result};
use regex::Regex;

/// Compiled title keywords and company slugs for one run.
#[derive(Debug, Default)]
pub struct Blocklist {
    titles: Vec<(String, Regex)>,
    companies: Vec<String>,
}

impl Blocklist {
    pub fn new(title_keywords: &[String], company_entries: &[String]) -> Result<Self> {
        let mut titles: Vec<(String, Regex)> = Vec::new();
        for keyword in title_keywords {
            let keyword = keyword.trim().to_lowercase();
            if keyword.is_empty() || titles.iter().any(|(k, _)| *k == keyword) {
                continue;
            }
            // Word boundaries on both sides so "intern" never hits "internal".
            let pattern = format!(r"(?i)(?:^|[^\w]){}(?:[^\w]|$)", regex::escape(&keyword));
            let re = Regex::new(&pattern)
                .with_context(|| format!("Invalid title keyword: {}", keyword))?;
            titles.push((keyword, re));
        }

        let mut companies: Vec<String> = Vec::new();
        for entry in company_entries {
            if let Some(slug) = normalize_company_entry(entry) {
                if !companies.contains(&slug) {
                    companies.push(slug);
                }
            }
        }

        Ok(Self { titles, companies })
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty() && self.companies.is_empty()
    }

    pub fn title_keywords(&self) -> impl Iterator<Item = &str> {
        self.titles.iter().map(|(k, _)| k.as_str())
    }

    pub fn companies(&self) -> &[String] {
        &self.companies
    }

    /// First keyword occurring in `title` as a whole word.
    pub fn match_title(&self, title: &str) -> Option<&str> {
        self.titles
            .iter()
            .find(|(_, re)| re.is_match(title))
            .map(|(k, _)| k.as_str())
    }

    /// First company slug contained in the listing's company URL.
    pub fn match_company(&self, company_url: Option<&str>) -> Option<&str> {
        let url = company_url?.to_lowercase();
        self.companies
            .iter()
            .find(|slug| url.contains(slug.as_str()))
            .map(String::as_str)
    }
}

/// Reduces a company URL, path, or bare slug to the lowercase slug.
pub fn normalize_company_entry(entry: &str) -> Option<String> {
    let lowered = entry.trim().to_lowercase();
    let rest = match lowered.find("linkedin.com/company/") {
        Some(idx) => &lowered[idx + "linkedin.com/company/".len()..],
        None => lowered.as_str(),
    };
    let rest = rest.split(['?', '#']).next().unwrap_or("");
    let slug = rest.trim_matches('/').split('/').next().unwrap_or("").trim();
    (!slug.is_empty()).then(|| slug.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_title_matches_whole_words_only() {
        let b = Blocklist::new(&strings(&["intern", "Senior"]), &[]).unwrap();
        assert_eq!(b.match_title("Internal Auditor"), None);
        assert_eq!(b.match_title("Intern, Backend"), Some("intern"));
        assert_eq!(b.match_title("Software Engineer (Intern)"), Some("intern"));
        assert_eq!(b.match_title("SENIOR Rust Developer"), Some("senior"));
        assert_eq!(b.match_title("Seniority Analyst"), None);
    }

    #[test]
    fn test_title_keyword_with_regex_metacharacters() {
        let b = Blocklist::new(&strings(&["c++"]), &[]).unwrap();
        assert_eq!(b.match_title("C++ Developer"), Some("c++"));
        assert_eq!(b.match_title("Cobol Developer"), None);
    }

    #[test]
    fn test_company_entry_forms_normalize_to_slug() {
        for entry in [
            "https://www.linkedin.com/company/acme/",
            "https://www.linkedin.com/company/Acme/life?trk=x",
            "https://linkedin.com/company/acme?ref=x",
            "acme",
        ] {
            assert_eq!(normalize_company_entry(entry).as_deref(), Some("acme"));
        }
        assert_eq!(normalize_company_entry("   "), None);
    }

    #[test]
    fn test_company_match_and_dedup() {
        let b = Blocklist::new(
            &[],
            &strings(&["acme", "https://www.linkedin.com/company/acme", "globex"]),
        )
        .unwrap();
        assert_eq!(b.companies().len(), 2);
        assert_eq!(
            b.match_company(Some("https://www.linkedin.com/company/ACME")),
            Some("acme")
        );
        assert_eq!(b.match_company(Some("https://www.linkedin.com/company/initech")), None);
        assert_eq!(b.match_company(None), None);
    }

    #[test]
    fn test_empty_entries_ignored() {
        let b = Blocklist::new(&strings(&["", "  "]), &strings(&[""])).unwrap();
        assert!(b.is_empty());
    }
}
