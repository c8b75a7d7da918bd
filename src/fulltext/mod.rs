pub mod downloader;
pub mod resolver;

pub use downloader::{CandidateAttempt, DownloadReport, PdfDownloader};
pub use resolver::{CandidateStream, FullTextResolver};

/// Files below this size are rejected as non-papers (error pages,
/// truncated bodies)
pub const MIN_PDF_BYTES: u64 = 10 * 1024;

/// Leading bytes of every valid PDF
pub const PDF_MAGIC: &[u8; 5] = b"%PDF-";
