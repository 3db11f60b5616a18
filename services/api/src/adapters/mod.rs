pub mod analyzer;
pub mod db;
pub mod scraper;
pub mod token;

pub use analyzer::HttpPolicyAnalyzer;
pub use db::PgDocumentStore;
pub use scraper::HttpPageScraper;
pub use token::JwtIdentityVerifier;
