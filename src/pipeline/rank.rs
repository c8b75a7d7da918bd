use crate::client::{Publication, ScoreBreakdown};
use crate::{Error, Result};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// Query intent, detected from keywords; selects the ranking weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Review,
    Recent,
    Method,
    Dataset,
    Balanced,
}

impl QueryIntent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Recent => "recent",
            Self::Method => "method",
            Self::Dataset => "dataset",
            Self::Balanced => "balanced",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-factor weights, summing to 1.0 within 1e-6
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    pub title: f64,
    pub abstract_text: f64,
    pub citations: f64,
    pub recency: f64,
}

pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl RankWeights {
    /// The preset for a detected intent
    #[must_use]
    pub const fn preset(intent: QueryIntent) -> Self {
        match intent {
            QueryIntent::Review => Self {
                title: 0.30,
                abstract_text: 0.20,
                citations: 0.40,
                recency: 0.10,
            },
            QueryIntent::Recent => Self {
                title: 0.35,
                abstract_text: 0.25,
                citations: 0.05,
                recency: 0.35,
            },
            QueryIntent::Method => Self {
                title: 0.30,
                abstract_text: 0.30,
                citations: 0.30,
                recency: 0.10,
            },
            QueryIntent::Dataset => Self {
                title: 0.40,
                abstract_text: 0.40,
                citations: 0.05,
                recency: 0.15,
            },
            QueryIntent::Balanced => Self {
                title: 0.40,
                abstract_text: 0.30,
                citations: 0.15,
                recency: 0.15,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.title + self.abstract_text + self.citations + self.recency;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::InvalidInput {
                field: "weights".to_string(),
                reason: format!("weights sum to {sum}, expected 1.0"),
            });
        }
        for (name, value) in [
            ("title", self.title),
            ("abstract", self.abstract_text),
            ("citations", self.citations),
            ("recency", self.recency),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput {
                    field: format!("weights.{name}"),
                    reason: format!("must be in [0, 1], got {value}"),
                });
            }
        }
        Ok(())
    }
}

// A compact English stopword list; enough to keep common glue words out
// of the overlap statistics
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "into", "is", "it", "its", "of", "on", "or", "that", "the", "their", "this", "to", "was",
    "were", "which", "with",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

fn year_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}$").expect("static regex"))
}

/// Lowercase, split on non-alphanumeric, drop stopwords
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !stopwords().contains(t))
        .map(String::from)
        .collect()
}

/// Lowercased text with non-alphanumeric runs collapsed to single
/// spaces; the haystack for phrase matching
fn normalize_for_phrase(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detect intent from query keywords. Rules apply in order; the first
/// match wins.
#[must_use]
pub fn detect_intent(query: &str, current_year: i32) -> QueryIntent {
    let lowered = query.to_lowercase();
    let tokens: HashSet<String> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    let has_token = |t: &str| tokens.contains(t);

    if has_token("review")
        || has_token("overview")
        || has_token("survey")
        || lowered.contains("meta-analysis")
        || lowered.contains("meta analysis")
    {
        return QueryIntent::Review;
    }

    let recent_year = tokens.iter().any(|t| {
        year_token_regex().is_match(t)
            && t.parse::<i32>().map_or(false, |y| y >= current_year - 1)
    });
    if has_token("recent") || has_token("latest") || has_token("new") || recent_year {
        return QueryIntent::Recent;
    }

    if has_token("method")
        || has_token("methods")
        || has_token("protocol")
        || has_token("technique")
        || has_token("analysis")
        || lowered.contains("how to")
    {
        return QueryIntent::Method;
    }

    if has_token("dataset")
        || has_token("datasets")
        || has_token("geo")
        || has_token("data")
        || tokens
            .iter()
            .any(|t| t.starts_with("gse") && t[3..].chars().all(|c| c.is_ascii_digit()))
    {
        return QueryIntent::Dataset;
    }

    QueryIntent::Balanced
}

/// Token-overlap score in [0, 1]: `|Q∩D| / sqrt(|Q|·|D|)` over unique
/// tokens, plus 0.2 for a contiguous phrase match, capped at 1.0.
#[must_use]
pub fn text_match_score(query: &str, field: &str) -> f64 {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    let field_tokens: HashSet<String> = tokenize(field).into_iter().collect();
    if query_tokens.is_empty() || field_tokens.is_empty() {
        return 0.0;
    }

    let intersection = query_tokens.intersection(&field_tokens).count() as f64;
    let denominator = ((query_tokens.len() * field_tokens.len()) as f64).sqrt();
    let mut score = intersection / denominator;

    let query_phrase = normalize_for_phrase(query);
    if !query_phrase.is_empty() && normalize_for_phrase(field).contains(&query_phrase) {
        score += 0.2;
    }

    score.min(1.0)
}

/// Recency factor: `exp(-0.15 * age_years)`, 0 without a date
#[must_use]
pub fn recency_score(age_years: Option<f64>) -> f64 {
    age_years.map_or(0.0, |age| {
        (-0.15 * age.max(0.0)).exp().clamp(0.0, 1.0)
    })
}

/// Absolute citation-count component with three-tier dampening
#[must_use]
pub fn citation_absolute(citations: u32) -> f64 {
    let c = f64::from(citations);
    if citations <= 100 {
        (c / 100.0) * 0.6
    } else if citations <= 1000 {
        0.6 + ((c - 100.0) / 900.0).sqrt() * 0.2
    } else {
        0.8 + ((c.log10() - 3.0) / 2.0).clamp(0.0, 1.0) * 0.2
    }
}

/// Citation factor: dampened absolute count blended with citation
/// velocity, with a surge bonus when recent momentum outpaces the
/// historical rate.
#[must_use]
pub fn citation_score(
    citations: u32,
    citations_last_3_years: Option<u32>,
    age_years: Option<f64>,
) -> f64 {
    if citations == 0 {
        return 0.0;
    }

    let absolute = citation_absolute(citations);
    let age = age_years.unwrap_or(0.0).max(0.1);
    let historical_rate = f64::from(citations) / age;
    let velocity = (historical_rate / 50.0).min(1.0);

    let mut score = match citations_last_3_years {
        Some(recent) => {
            let recent_rate = f64::from(recent) / 3.0;
            let recent_velocity = (recent_rate / 50.0).min(1.0);
            let mut combined = 0.6 * absolute + 0.4 * recent_velocity;
            if recent_rate >= historical_rate * 1.5 {
                combined *= 1.15;
            }
            combined
        }
        None => 0.6 * absolute + 0.4 * velocity,
    };

    score = score.clamp(0.0, 1.0);
    score
}

/// Deterministic multi-factor ranker
#[derive(Debug, Clone)]
pub struct Ranker {
    today: NaiveDate,
}

impl Ranker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            today: Utc::now().date_naive(),
        }
    }

    /// Fix the reference date (tests and cached replays)
    #[must_use]
    pub const fn with_today(today: NaiveDate) -> Self {
        Self { today }
    }

    #[must_use]
    pub const fn today(&self) -> NaiveDate {
        self.today
    }

    /// Score one publication against a query under the given weights
    #[must_use]
    pub fn score(&self, publication: &Publication, query: &str, weights: &RankWeights) -> (f64, ScoreBreakdown) {
        let age = publication.age_years(self.today);

        let breakdown = ScoreBreakdown {
            title: text_match_score(query, &publication.title),
            abstract_text: publication
                .abstract_text
                .as_deref()
                .map_or(0.0, |text| text_match_score(query, text)),
            citations: citation_score(
                publication.citations,
                publication.citations_last_3_years,
                age,
            ),
            recency: recency_score(age),
        };

        let score = weights.title * breakdown.title
            + weights.abstract_text * breakdown.abstract_text
            + weights.citations * breakdown.citations
            + weights.recency * breakdown.recency;

        (score.clamp(0.0, 1.0), breakdown)
    }

    /// Score and sort in place: score descending, ties by citations,
    /// then publication date, then insertion order (stable sort).
    pub fn rank(&self, publications: &mut Vec<Publication>, query: &str, weights: &RankWeights) {
        for publication in publications.iter_mut() {
            let (score, breakdown) = self.score(publication, query, weights);
            publication.score = score;
            publication.score_breakdown = breakdown;
        }

        publications.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.citations.cmp(&a.citations))
                .then_with(|| b.effective_date().cmp(&a.effective_date()))
        });

        debug!("Ranked {} publications", publications.len());
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new()
    }
}
