//! Text analysis for full-text indexes.

mod analyzer;
mod fold;
mod locale;
mod stoplist;

pub use analyzer::{AnalyzedText, TextAnalyzer, WordInfo};
pub use fold::fold_diacritics;
pub use locale::lowercase;
pub use stoplist::is_stop_word;
