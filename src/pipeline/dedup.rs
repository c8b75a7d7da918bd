use crate::client::Publication;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Similarity threshold for fuzzy title matches
pub const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.90;

/// Deduplication key, in matching precedence order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DedupKey {
    Doi(String),
    Pmid(String),
    ScholarId(String),
    Fuzzy {
        normalized_title: String,
        year: Option<i32>,
    },
}

impl DedupKey {
    /// The highest-precedence key derivable from a publication
    #[must_use]
    pub fn for_publication(publication: &Publication) -> Self {
        if let Some(doi) = &publication.doi {
            return Self::Doi(doi.clone());
        }
        if let Some(pmid) = &publication.pmid {
            return Self::Pmid(pmid.clone());
        }
        if let Some(scholar_id) = &publication.scholar_id {
            return Self::ScholarId(scholar_id.clone());
        }
        Self::Fuzzy {
            normalized_title: normalize_title(&publication.title),
            year: publication.year,
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Two fuzzy keys collide iff normalized titles reach the similarity
/// threshold and years are within ±1 (or either is absent)
#[must_use]
pub fn fuzzy_match(a_title: &str, a_year: Option<i32>, b_title: &str, b_year: Option<i32>) -> bool {
    let years_compatible = match (a_year, b_year) {
        (Some(a), Some(b)) => (a - b).abs() <= 1,
        _ => true,
    };
    if !years_compatible {
        return false;
    }
    strsim::normalized_levenshtein(a_title, b_title) >= FUZZY_SIMILARITY_THRESHOLD
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // anchor stability: the smaller input index stays the root
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Merge publications from N sources into one record per work.
///
/// Deterministic and stable: exact identifier links (DOI, PMID, Scholar
/// id) are authoritative; identifier-less records join clusters via
/// single-linkage fuzzy title matching in input order. A fuzzy link that
/// would fuse two clusters carrying distinct DOIs is rejected, keeping
/// both clusters. Output order follows each cluster anchor's input
/// position. Idempotent.
#[must_use]
pub fn dedupe(publications: Vec<Publication>) -> Vec<Publication> {
    let input_count = publications.len();
    if input_count <= 1 {
        return publications;
    }

    let mut uf = UnionFind::new(input_count);

    // Exact identifier links
    let mut by_doi: HashMap<&str, usize> = HashMap::new();
    let mut by_pmid: HashMap<&str, usize> = HashMap::new();
    let mut by_scholar: HashMap<&str, usize> = HashMap::new();
    for (i, publication) in publications.iter().enumerate() {
        if let Some(doi) = publication.doi.as_deref() {
            match by_doi.get(doi) {
                Some(&first) => uf.union(first, i),
                None => {
                    by_doi.insert(doi, i);
                }
            }
        }
        if let Some(pmid) = publication.pmid.as_deref() {
            match by_pmid.get(pmid) {
                Some(&first) => uf.union(first, i),
                None => {
                    by_pmid.insert(pmid, i);
                }
            }
        }
        if let Some(id) = publication.scholar_id.as_deref() {
            match by_scholar.get(id) {
                Some(&first) => uf.union(first, i),
                None => {
                    by_scholar.insert(id, i);
                }
            }
        }
    }

    // Fuzzy links, only for records whose best key is the fuzzy one
    let normalized: Vec<String> = publications
        .iter()
        .map(|p| normalize_title(&p.title))
        .collect();
    for i in 0..input_count {
        if !matches!(DedupKey::for_publication(&publications[i]), DedupKey::Fuzzy { .. }) {
            continue;
        }
        for j in 0..i {
            if !fuzzy_match(
                &normalized[i],
                publications[i].year,
                &normalized[j],
                publications[j].year,
            ) {
                continue;
            }
            if doi_conflict(&publications, &mut uf, i, j) {
                warn!(
                    "Rejecting fuzzy merge that would fuse distinct DOIs: {:?} / {:?}",
                    publications[i].title, publications[j].title
                );
                continue;
            }
            uf.union(i, j);
        }
    }

    // Collect clusters, anchored at the earliest input position
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut root_to_cluster: HashMap<usize, usize> = HashMap::new();
    for i in 0..input_count {
        let root = uf.find(i);
        match root_to_cluster.get(&root) {
            Some(&c) => clusters[c].push(i),
            None => {
                root_to_cluster.insert(root, clusters.len());
                clusters.push(vec![i]);
            }
        }
    }
    clusters.sort_by_key(|members| members[0]);

    let mut publications: Vec<Option<Publication>> =
        publications.into_iter().map(Some).collect();
    let merged: Vec<Publication> = clusters
        .into_iter()
        .map(|members| {
            let cluster: Vec<Publication> = members
                .into_iter()
                .map(|i| publications[i].take().expect("each index visited once"))
                .collect();
            merge_cluster(cluster)
        })
        .collect();

    debug!("Deduplicated {} publications to {}", input_count, merged.len());
    merged
}

/// Would uniting i and j put two distinct DOIs in one cluster?
fn doi_conflict(publications: &[Publication], uf: &mut UnionFind, i: usize, j: usize) -> bool {
    let (ri, rj) = (uf.find(i), uf.find(j));
    if ri == rj {
        return false;
    }
    // full scan of both clusters; cheap at the candidate counts involved
    let mut cluster_doi = |root: usize| -> Option<String> {
        (0..publications.len())
            .filter(|&k| uf.find(k) == root)
            .find_map(|k| publications[k].doi.clone())
    };
    match (cluster_doi(ri), cluster_doi(rj)) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

/// Rank used when choosing bibliographic field values: the best source
/// precedence among the record's tags
fn precedence(publication: &Publication) -> u8 {
    publication
        .sources
        .iter()
        .map(|s| s.bibliographic_rank())
        .min()
        .unwrap_or(u8::MAX)
}

/// Merge one cluster into a fresh record
fn merge_cluster(mut cluster: Vec<Publication>) -> Publication {
    if cluster.len() == 1 {
        return cluster.pop().expect("non-empty cluster");
    }

    let merged_from: Vec<String> = cluster.iter().map(Publication::display_id).collect();

    let mut by_precedence: Vec<usize> = (0..cluster.len()).collect();
    by_precedence.sort_by_key(|&i| (precedence(&cluster[i]), i));

    let mut merged = cluster[0].clone();

    let pick_string = |field: fn(&Publication) -> Option<&String>| -> Option<String> {
        by_precedence
            .iter()
            .find_map(|&i| field(&cluster[i]).cloned())
    };

    merged.doi = pick_string(|p| p.doi.as_ref());
    merged.pmid = pick_string(|p| p.pmid.as_ref());
    merged.pmcid = pick_string(|p| p.pmcid.as_ref());
    merged.scholar_id = pick_string(|p| p.scholar_id.as_ref());
    merged.s2_paper_id = pick_string(|p| p.s2_paper_id.as_ref());
    merged.abstract_text = pick_string(|p| p.abstract_text.as_ref());
    merged.venue = pick_string(|p| p.venue.as_ref());
    merged.fulltext_url = pick_string(|p| p.fulltext_url.as_ref());

    merged.title = by_precedence
        .iter()
        .map(|&i| cluster[i].title.clone())
        .find(|t| !t.trim().is_empty())
        .unwrap_or_else(|| cluster[0].title.clone());
    merged.year = by_precedence.iter().find_map(|&i| cluster[i].year);

    // dates: precedence wins unless members conflict by more than a
    // year, in which case the earliest date is authoritative
    let dates: Vec<chrono::NaiveDate> = cluster
        .iter()
        .filter_map(|p| p.publication_date)
        .collect();
    merged.publication_date = by_precedence
        .iter()
        .find_map(|&i| cluster[i].publication_date);
    if let (Some(min), Some(max)) = (dates.iter().min(), dates.iter().max()) {
        if (*max - *min).num_days() > 366 {
            merged.publication_date = Some(*min);
            merged
                .source_specific
                .insert("date_conflict".to_string(), serde_json::Value::Bool(true));
        }
    }

    // impact: maxima across members
    merged.citations = cluster.iter().map(|p| p.citations).max().unwrap_or(0);
    merged.citations_last_3_years = cluster
        .iter()
        .filter_map(|p| p.citations_last_3_years)
        .max();
    merged.influential_citations = cluster
        .iter()
        .filter_map(|p| p.influential_citations)
        .max();

    merged.is_open_access = cluster.iter().any(|p| p.is_open_access);
    merged.pdf_local_path = cluster.iter().find_map(|p| p.pdf_local_path.clone());

    // unions
    merged.sources = cluster.iter().flat_map(|p| p.sources.clone()).collect();

    let mut seen_authors: Vec<String> = Vec::new();
    merged.authors = Vec::new();
    for &i in &by_precedence {
        for author in &cluster[i].authors {
            let key = author.normalized_name();
            if !seen_authors.contains(&key) {
                seen_authors.push(key);
                merged.authors.push(author.clone());
            }
        }
    }

    merged.institutional_urls = Vec::new();
    for member in &cluster {
        for candidate in &member.institutional_urls {
            if merged
                .institutional_urls
                .iter()
                .all(|c| c.url != candidate.url)
            {
                merged.institutional_urls.push(candidate.clone());
            }
        }
    }

    for member in &cluster {
        for (key, value) in &member.source_specific {
            merged
                .source_specific
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    merged.merged_from = merged_from;

    if let Some(recent) = merged.citations_last_3_years {
        if recent > merged.citations {
            merged.citations_last_3_years = Some(merged.citations);
        }
    }

    merged
}

/// True iff the merged output satisfies the uniqueness guarantees
#[cfg(test)]
fn no_shared_identifiers(publications: &[Publication]) -> bool {
    let mut dois = std::collections::HashSet::new();
    let mut pmids = std::collections::HashSet::new();
    for p in publications {
        if let Some(doi) = &p.doi {
            if !dois.insert(doi.clone()) {
                return false;
            }
        }
        if let Some(pmid) = &p.pmid {
            if !pmids.insert(pmid.clone()) {
                return false;
            }
        }
    }
    true
}
