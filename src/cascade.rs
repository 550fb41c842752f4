use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::blocklist::Blocklist;
use crate::config::Settings;
use crate::dedup::DuplicateIndex;
use crate::models::{DismissReason, Listing};
use crate::similarity::ContentComparator;
use crate::source::ListingSource;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Already recorded; no action, no write.
    Skip,
    Keep,
    Suppress(DismissReason),
}

/// Classification rules, in evaluation order. The first rule that decides wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    AlreadyRecorded,
    NativeDismissal,
    TitleBlocklist,
    CompanyBlocklist,
    SelfApplied,
    NearDuplicate,
}

pub const RULES: [Rule; 6] = [
    Rule::AlreadyRecorded,
    Rule::NativeDismissal,
    Rule::TitleBlocklist,
    Rule::CompanyBlocklist,
    Rule::SelfApplied,
    Rule::NearDuplicate,
];

pub struct DecisionCascade {
    blocklist: Blocklist,
    duplicates: DuplicateIndex,
    comparator: Arc<dyn ContentComparator>,
    source: Arc<dyn ListingSource>,
    threshold: f64,
    compare_descriptions: bool,
    action_delay: Duration,
}

impl DecisionCascade {
    pub fn new(
        blocklist: Blocklist,
        duplicates: DuplicateIndex,
        comparator: Arc<dyn ContentComparator>,
        source: Arc<dyn ListingSource>,
        settings: &Settings,
    ) -> Self {
        Self {
            blocklist,
            duplicates,
            comparator,
            source,
            threshold: settings.similarity_threshold,
            compare_descriptions: settings.compare_descriptions,
            action_delay: settings.action_delay,
        }
    }

    pub fn duplicates(&self) -> &DuplicateIndex {
        &self.duplicates
    }

    /// `recorded` is the page's batched existence set.
    pub async fn classify(&self, listing: &Listing, recorded: &HashSet<String>) -> Result<Decision> {
        for rule in RULES {
            if let Some(decision) = self.evaluate(rule, listing, recorded).await? {
                debug!(id = %listing.id, ?rule, ?decision, "Rule fired");
                return Ok(decision);
            }
        }
        Ok(Decision::Keep)
    }

    /// Applies one rule in isolation. `None` means the rule does not decide.
    pub async fn evaluate(
        &self,
        rule: Rule,
        listing: &Listing,
        recorded: &HashSet<String>,
    ) -> Result<Option<Decision>> {
        let decision = match rule {
            Rule::AlreadyRecorded => recorded.contains(&listing.id).then_some(Decision::Skip),
            Rule::NativeDismissal => listing
                .natively_dismissed
                .then_some(Decision::Suppress(DismissReason::NativeDismissal)),
            Rule::TitleBlocklist => self.blocklist.match_title(&listing.title).map(|keyword| {
                Decision::Suppress(DismissReason::JobTitle {
                    keyword: keyword.to_string(),
                })
            }),
            Rule::CompanyBlocklist => self
                .blocklist
                .match_company(listing.company_url.as_deref())
                .map(|keyword| {
                    Decision::Suppress(DismissReason::Company {
                        keyword: keyword.to_string(),
                    })
                }),
            Rule::SelfApplied => listing
                .is_applied
                .then_some(Decision::Suppress(DismissReason::Applied)),
            Rule::NearDuplicate => self.near_duplicate(listing).await?,
        };
        Ok(decision)
    }

    async fn near_duplicate(&self, listing: &Listing) -> Result<Option<Decision>> {
        if !self.compare_descriptions {
            return Ok(None);
        }
        let matched_id = match self
            .duplicates
            .earliest_duplicate(&listing.title, &listing.company)?
        {
            Some(id) if id != listing.id => id,
            _ => return Ok(None),
        };

        sleep(self.action_delay).await;
        let current = self.source.fetch_description(&listing.id).await?;
        sleep(self.action_delay).await;
        let earlier = self.source.fetch_description(&matched_id).await?;

        let (Some(current), Some(earlier)) = (current, earlier) else {
            debug!(id = %listing.id, matched = %matched_id, "Description unavailable, skipping comparison");
            return Ok(None);
        };

        let similarity = self.comparator.similarity(&current, &earlier);
        debug!(id = %listing.id, matched = %matched_id, similarity, "Compared descriptions");
        if similarity >= self.threshold {
            Ok(Some(Decision::Suppress(DismissReason::DuplicateDescription {
                matched_id,
                similarity,
            })))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DismissalStore};
    use crate::models::DismissalRecord;
    use crate::similarity::LevenshteinComparator;
    use crate::testing::FakeSource;

    struct FixedScore(f64);

    impl ContentComparator for FixedScore {
        fn similarity(&self, _a: &str, _b: &str) -> f64 {
            self.0
        }
    }

    fn settings() -> Settings {
        Settings {
            action_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
            backoff_unit: Duration::ZERO,
            ..Default::default()
        }
    }

    fn cascade_with(
        titles: &[&str],
        companies: &[&str],
        db: Arc<Database>,
        source: Arc<FakeSource>,
        comparator: Arc<dyn ContentComparator>,
    ) -> DecisionCascade {
        let titles: Vec<String> = titles.iter().map(|s| s.to_string()).collect();
        let companies: Vec<String> = companies.iter().map(|s| s.to_string()).collect();
        DecisionCascade::new(
            Blocklist::new(&titles, &companies).unwrap(),
            DuplicateIndex::new(db),
            comparator,
            source,
            &settings(),
        )
    }

    fn cascade(titles: &[&str], companies: &[&str]) -> DecisionCascade {
        cascade_with(
            titles,
            companies,
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeSource::default()),
            Arc::new(LevenshteinComparator),
        )
    }

    fn listing(id: &str, title: &str, company_url: &str) -> Listing {
        Listing {
            id: id.into(),
            title: title.into(),
            company: "Foo".into(),
            location: "Toronto, ON".into(),
            job_url: format!("https://www.linkedin.com/jobs/view/{}", id),
            company_url: Some(company_url.into()),
            ..Default::default()
        }
    }

    fn earlier_record(id: &str, title: &str, company: &str) -> DismissalRecord {
        DismissalRecord {
            listing_id: id.into(),
            title: title.into(),
            company: company.into(),
            location: "Toronto, ON".into(),
            reason: "job_title".into(),
            job_url: format!("https://www.linkedin.com/jobs/view/{}", id),
            company_url: None,
            is_reposted: false,
            listed_at: Some("2026-01-01 00:00:00".into()),
            dismissed_at: "2026-01-01 00:00:00".into(),
            user_id: None,
            run_id: None,
        }
    }

    #[tokio::test]
    async fn test_title_blocklist_suppresses() {
        let c = cascade(&["senior"], &[]);
        let l = listing("1", "Senior Engineer", "https://www.linkedin.com/company/foo");
        let decision = c.classify(&l, &HashSet::new()).await.unwrap();
        assert_eq!(
            decision,
            Decision::Suppress(DismissReason::JobTitle {
                keyword: "senior".into()
            })
        );
        if let Decision::Suppress(reason) = decision {
            assert_eq!(reason.code(), "job_title");
        }
    }

    #[tokio::test]
    async fn test_already_recorded_skips_before_everything() {
        let c = cascade(&["x"], &[]);
        let mut l = listing("123", "X", "https://www.linkedin.com/company/foo");
        l.natively_dismissed = true;
        let recorded: HashSet<String> = ["123".to_string()].into();
        assert_eq!(c.classify(&l, &recorded).await.unwrap(), Decision::Skip);
    }

    #[tokio::test]
    async fn test_native_dismissal_precedes_blocklists() {
        let c = cascade(&["senior"], &["foo"]);
        let mut l = listing("2", "Senior Engineer", "https://www.linkedin.com/company/foo");
        l.natively_dismissed = true;
        assert_eq!(
            c.classify(&l, &HashSet::new()).await.unwrap(),
            Decision::Suppress(DismissReason::NativeDismissal)
        );
    }

    #[tokio::test]
    async fn test_company_matches_url_not_display_name() {
        let c = cascade(&[], &["https://www.linkedin.com/company/acme/"]);
        let mut l = listing("3", "Engineer", "https://www.linkedin.com/company/acme");
        l.company = "Totally Different Inc".into();
        assert_eq!(
            c.classify(&l, &HashSet::new()).await.unwrap(),
            Decision::Suppress(DismissReason::Company {
                keyword: "acme".into()
            })
        );

        let mut l = listing("4", "Engineer", "https://www.linkedin.com/company/other");
        l.company = "Acme".into();
        assert_eq!(c.classify(&l, &HashSet::new()).await.unwrap(), Decision::Keep);
    }

    #[tokio::test]
    async fn test_company_rule_precedes_applied() {
        let c = cascade(&[], &["foo"]);
        let mut l = listing("5", "Engineer", "https://www.linkedin.com/company/foo");
        l.is_applied = true;
        assert!(matches!(
            c.classify(&l, &HashSet::new()).await.unwrap(),
            Decision::Suppress(DismissReason::Company { .. })
        ));

        let c = cascade(&[], &[]);
        assert_eq!(
            c.classify(&l, &HashSet::new()).await.unwrap(),
            Decision::Suppress(DismissReason::Applied)
        );
    }

    #[tokio::test]
    async fn test_rules_evaluate_independently() {
        let c = cascade(&["senior"], &[]);
        let l = listing("6", "Senior Engineer", "https://www.linkedin.com/company/foo");
        let none = HashSet::new();
        assert_eq!(c.evaluate(Rule::AlreadyRecorded, &l, &none).await.unwrap(), None);
        assert_eq!(c.evaluate(Rule::SelfApplied, &l, &none).await.unwrap(), None);
        assert!(c.evaluate(Rule::TitleBlocklist, &l, &none).await.unwrap().is_some());
    }

    async fn near_duplicate_decision(score: f64) -> Decision {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_dismissal(&earlier_record("10", "Rust Engineer", "Foo")).unwrap();
        let source = Arc::new(FakeSource::default());
        source.set_description("20", "new posting text");
        source.set_description("10", "old posting text");
        let c = cascade_with(&[], &[], db, source, Arc::new(FixedScore(score)));
        let l = listing("20", "Rust Engineer", "https://www.linkedin.com/company/foo");
        c.classify(&l, &HashSet::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_near_duplicate_threshold_boundary() {
        assert_eq!(
            near_duplicate_decision(0.95).await,
            Decision::Suppress(DismissReason::DuplicateDescription {
                matched_id: "10".into(),
                similarity: 0.95
            })
        );
        assert_eq!(near_duplicate_decision(0.9499).await, Decision::Keep);
    }

    #[tokio::test]
    async fn test_near_duplicate_of_itself_is_kept() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_dismissal(&earlier_record("10", "Rust Engineer", "Foo")).unwrap();
        let source = Arc::new(FakeSource::default());
        let c = cascade_with(&[], &[], db, source.clone(), Arc::new(FixedScore(1.0)));
        let l = listing("10", "Rust Engineer", "https://www.linkedin.com/company/foo");
        assert_eq!(c.classify(&l, &HashSet::new()).await.unwrap(), Decision::Keep);
        assert_eq!(source.calls("fetch_description"), 0);
    }

    #[tokio::test]
    async fn test_missing_description_keeps() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_dismissal(&earlier_record("10", "Rust Engineer", "Foo")).unwrap();
        let source = Arc::new(FakeSource::default());
        source.set_description("20", "only one side");
        let c = cascade_with(&[], &[], db, source.clone(), Arc::new(FixedScore(1.0)));
        let l = listing("20", "Rust Engineer", "https://www.linkedin.com/company/foo");
        assert_eq!(c.classify(&l, &HashSet::new()).await.unwrap(), Decision::Keep);
        assert_eq!(source.calls("fetch_description"), 2);
    }

    #[tokio::test]
    async fn test_degraded_mode_skips_comparison() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_dismissal(&earlier_record("10", "Rust Engineer", "Foo")).unwrap();
        let source = Arc::new(FakeSource::default());
        let mut s = settings();
        s.compare_descriptions = false;
        let c = DecisionCascade::new(
            Blocklist::default(),
            DuplicateIndex::new(db),
            Arc::new(FixedScore(1.0)),
            source.clone(),
            &s,
        );
        let l = listing("20", "Rust Engineer", "https://www.linkedin.com/company/foo");
        assert_eq!(c.classify(&l, &HashSet::new()).await.unwrap(), Decision::Keep);
        assert_eq!(source.calls("fetch_description"), 0);
    }
}
