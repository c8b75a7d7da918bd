pub mod europe_pmc;
pub mod openalex;
pub mod pubmed;
pub mod scholar;
pub mod semantic_scholar;
pub mod traits;
pub mod unpaywall;

pub use europe_pmc::EuropePmcClient;
pub use openalex::OpenAlexClient;
pub use pubmed::PubMedClient;
pub use scholar::ScholarClient;
pub use semantic_scholar::SemanticScholarClient;
pub use traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
pub use unpaywall::UnpaywallClient;
