use chrono::NaiveDate;
use omics_oracle::client::{Publication, SourceId};
use omics_oracle::pipeline::rank::{
    citation_absolute, citation_score, recency_score, text_match_score, QueryIntent, RankWeights,
    Ranker,
};
use omics_oracle::pipeline::{dedupe, detect_intent};
use proptest::prelude::*;

/// Property-based tests for the scoring and deduplication algorithms
mod citation_props {
    use super::*;

    proptest! {
        #[test]
        fn absolute_stays_in_unit_interval(citations in 0u32..=10_000_000) {
            let score = citation_absolute(citations);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn absolute_is_monotone(a in 0u32..=1_000_000, b in 0u32..=1_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(citation_absolute(lo) <= citation_absolute(hi) + 1e-12);
        }

        #[test]
        fn combined_score_stays_in_unit_interval(
            citations in 0u32..=5_000_000,
            recent in proptest::option::of(0u32..=1_000_000),
            age in proptest::option::of(0.0f64..80.0),
        ) {
            let recent = recent.map(|r| r.min(citations));
            let score = citation_score(citations, recent, age);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn zero_citations_score_zero(
            recent in proptest::option::of(0u32..=0),
            age in proptest::option::of(0.0f64..80.0),
        ) {
            prop_assert!(citation_score(0, recent, age).abs() < 1e-12);
        }
    }
}

mod text_props {
    use super::*;

    proptest! {
        #[test]
        fn text_match_stays_in_unit_interval(
            query in "[a-zA-Z0-9 ]{0,60}",
            field in "[a-zA-Z0-9 .,-]{0,200}",
        ) {
            let score = text_match_score(&query, &field);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn identical_text_scores_at_least_token_overlap(text in "[a-z]{3,12}( [a-z]{3,12}){0,5}") {
            // identical non-stopword text always phrase-matches itself
            let score = text_match_score(&text, &text);
            if !text.trim().is_empty() && score > 0.0 {
                prop_assert!(score >= 0.2);
            }
        }

        #[test]
        fn recency_decays(age_a in 0.0f64..50.0, age_b in 0.0f64..50.0) {
            let (young, old) = if age_a <= age_b { (age_a, age_b) } else { (age_b, age_a) };
            prop_assert!(recency_score(Some(young)) >= recency_score(Some(old)));
        }
    }
}

mod weight_props {
    use super::*;

    #[test]
    fn every_preset_sums_to_one() {
        for intent in [
            QueryIntent::Review,
            QueryIntent::Recent,
            QueryIntent::Method,
            QueryIntent::Dataset,
            QueryIntent::Balanced,
        ] {
            let weights = RankWeights::preset(intent);
            let sum = weights.title + weights.abstract_text + weights.citations + weights.recency;
            assert!((sum - 1.0).abs() <= 1e-6, "{intent}: {sum}");
            weights.validate().unwrap();
        }
    }

    proptest! {
        #[test]
        fn intent_detection_is_total_and_deterministic(query in ".{0,120}") {
            let a = detect_intent(&query, 2026);
            let b = detect_intent(&query, 2026);
            prop_assert_eq!(a, b);
        }
    }
}

mod dedup_props {
    use super::*;

    fn arbitrary_publication(
        seed: u8,
        title_pool: &[&str],
        doi_pool: &[Option<&str>],
        year: i32,
    ) -> Publication {
        let title = title_pool[seed as usize % title_pool.len()];
        let mut p = Publication::new(title, SourceId::ALL[seed as usize % 5]);
        p.doi = doi_pool[seed as usize % doi_pool.len()].map(String::from);
        p.year = Some(year);
        p.citations = u32::from(seed) * 3;
        p
    }

    proptest! {
        #[test]
        fn dedupe_is_idempotent(seeds in proptest::collection::vec(0u8..=255, 0..20)) {
            let titles = ["alpha genomics", "beta proteomics", "gamma metabolomics"];
            let dois = [Some("10.1/a"), Some("10.2/b"), None];
            let publications: Vec<Publication> = seeds
                .iter()
                .map(|&s| arbitrary_publication(s, &titles, &dois, 2020 + i32::from(s % 3)))
                .collect();

            let once = dedupe(publications);
            let twice = dedupe(once.clone());
            prop_assert_eq!(once.len(), twice.len());
            for (a, b) in once.iter().zip(twice.iter()) {
                prop_assert_eq!(&a.title, &b.title);
                prop_assert_eq!(&a.doi, &b.doi);
                prop_assert_eq!(a.citations, b.citations);
            }
        }

        #[test]
        fn dedupe_never_leaves_duplicate_identifiers(seeds in proptest::collection::vec(0u8..=255, 0..20)) {
            let titles = ["alpha genomics", "beta proteomics", "gamma metabolomics"];
            let dois = [Some("10.1/a"), Some("10.2/b"), None];
            let publications: Vec<Publication> = seeds
                .iter()
                .map(|&s| arbitrary_publication(s, &titles, &dois, 2021))
                .collect();

            let merged = dedupe(publications);
            let mut dois_seen = std::collections::HashSet::new();
            let mut pmids_seen = std::collections::HashSet::new();
            for p in &merged {
                if let Some(doi) = &p.doi {
                    prop_assert!(dois_seen.insert(doi.clone()), "duplicate DOI {}", doi);
                }
                if let Some(pmid) = &p.pmid {
                    prop_assert!(pmids_seen.insert(pmid.clone()), "duplicate PMID {}", pmid);
                }
            }
        }
    }
}

mod ranking_props {
    use super::*;

    proptest! {
        #[test]
        fn ranked_output_is_sorted_and_bounded(
            citation_counts in proptest::collection::vec(0u32..=500_000, 1..30),
        ) {
            let ranker = Ranker::with_today(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
            let weights = RankWeights::preset(QueryIntent::Balanced);

            let mut publications: Vec<Publication> = citation_counts
                .iter()
                .enumerate()
                .map(|(i, &citations)| {
                    let mut p = Publication::new(format!("publication number {i}"), SourceId::Pubmed);
                    p.year = Some(2015 + (i as i32 % 10));
                    p.citations = citations;
                    p
                })
                .collect();

            ranker.rank(&mut publications, "publication number", &weights);

            for p in &publications {
                prop_assert!(p.score >= -1e-6 && p.score <= 1.0 + 1e-6);
                prop_assert!(!p.title.is_empty());
                prop_assert!(!p.sources.is_empty());
            }
            for window in publications.windows(2) {
                prop_assert!(window[0].score >= window[1].score - 1e-9);
            }
        }
    }
}
