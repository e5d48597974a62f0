pub mod aliases;
pub mod completeness;
pub mod extractor;
pub mod fallback;
pub mod sanitizer;

pub use completeness::{is_complete, repair};
pub use extractor::{CandidateSource, Extraction, SqlExtractor};
pub use fallback::{FallbackCatalog, FallbackTemplate};
pub use sanitizer::{is_destructive, sanitize};
