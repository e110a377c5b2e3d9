//! Book candidate validation.
//!
//! The single gate between enrichment and the master catalog. The same
//! rules run for bulk generation and for catalog cleanup.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;
use shared::{isbn, CanonicalBook};

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    EmptyTitle,
    NoAuthor,
    /// Boxed sets, omnibus editions and similar bundles
    Collection(String),
    /// Journals, summaries, foreign editions, anthologies
    NotABook(String),
    MissingIdentifier,
    TooShort(u32),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::EmptyTitle => write!(f, "empty title"),
            RejectReason::NoAuthor => write!(f, "no author"),
            RejectReason::Collection(pattern) => write!(f, "collection title ({})", pattern),
            RejectReason::NotABook(pattern) => write!(f, "non-book title ({})", pattern),
            RejectReason::MissingIdentifier => write!(f, "no ISBN-13 or external id"),
            RejectReason::TooShort(pages) => write!(f, "only {} pages", pages),
        }
    }
}

/// Verdict of [`validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<RejectReason>,
}

impl Validation {
    fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Pages at or below this count mark pamphlets and samplers
const MIN_PAGE_COUNT: u32 = 50;

const COLLECTION_PATTERNS: &[&str] = &[
    r"\bbox(ed)?[\s-]*set\b",
    r"\bboxset\b",
    r"\bomnibus\b",
    r"\bcollection\b",
    r"\bcomplete\s+(series|saga|trilogy|novels)\b",
    r"\bbooks?\s+\d+\s*(-|–|to|&|and)\s*\d+\b",
    r"\b(trilogy|series|saga)\s+(set|bundle)\b",
    r"\bbundle\b",
    r"\b\d+[\s-]*book\s+(set|collection|bundle)\b",
];

const NON_BOOK_PATTERNS: &[&str] = &[
    r"\bjournal\b",
    r"\bnotebook\b",
    r"\bdiary\b",
    r"\bplanner\b",
    r"\bcoloring\s+book\b",
    r"\bsummary\s+(of|and\s+analysis)\b",
    r"^summary\b",
    r"\bstudy\s+guide\b",
    r"\bworkbook\b",
    r"\b(sparknotes|cliffsnotes)\b",
    r"\((spanish|french|german|italian|portuguese|dutch|russian|japanese|chinese)\s+edition\)",
    r"\b(edición|édition|ausgabe|edizione)\b",
    r"\banthology\b",
    r"\bpresents\b",
    r";",
];

static COLLECTION_SET: Lazy<RegexSet> = Lazy::new(|| case_insensitive_set(COLLECTION_PATTERNS));
static NON_BOOK_SET: Lazy<RegexSet> = Lazy::new(|| case_insensitive_set(NON_BOOK_PATTERNS));
static BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*$").expect("valid regex"));

fn case_insensitive_set(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns.iter().map(|p| format!("(?i){}", p))).expect("valid pattern set")
}

/// First pattern of `set` matching `title`
fn first_match(set: &RegexSet, patterns: &[&str], title: &str) -> Option<String> {
    set.matches(title)
        .iter()
        .next()
        .map(|index| patterns[index].to_string())
}

/// Check a candidate against the catalog rules; the first failing rule wins.
pub fn validate(candidate: &CanonicalBook) -> Validation {
    let title = candidate.title.trim();
    if title.is_empty() {
        return Validation::reject(RejectReason::EmptyTitle);
    }

    if candidate.authors.iter().all(|a| BLANK.is_match(a)) {
        return Validation::reject(RejectReason::NoAuthor);
    }

    if let Some(pattern) = first_match(&COLLECTION_SET, COLLECTION_PATTERNS, title) {
        return Validation::reject(RejectReason::Collection(pattern));
    }

    if let Some(pattern) = first_match(&NON_BOOK_SET, NON_BOOK_PATTERNS, title) {
        return Validation::reject(RejectReason::NotABook(pattern));
    }

    let has_isbn13 = candidate
        .isbn13
        .as_deref()
        .map(isbn::is_isbn13)
        .unwrap_or(false);
    let has_external_id = candidate
        .external_id
        .as_deref()
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false);
    if !has_isbn13 && !has_external_id {
        return Validation::reject(RejectReason::MissingIdentifier);
    }

    if let Some(pages) = candidate.page_count {
        if pages > 0 && pages <= MIN_PAGE_COUNT {
            return Validation::reject(RejectReason::TooShort(pages));
        }
    }

    Validation::accept()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, author: &str, isbn13: Option<&str>) -> CanonicalBook {
        let authors = if author.is_empty() {
            Vec::new()
        } else {
            vec![author.to_string()]
        };
        let mut book = CanonicalBook::new(title, authors);
        book.isbn13 = isbn13.map(str::to_string);
        book
    }

    #[test]
    fn test_valid_book() {
        let mut dune = book("Dune", "Frank Herbert", Some("9780441013593"));
        dune.page_count = Some(528);
        assert_eq!(validate(&dune), Validation::accept());
    }

    #[test]
    fn test_boxed_set_rejected_as_collection() {
        let candidate = book("The Stormlight Archive Boxed Set", "X", Some("1234567890123"));
        let verdict = validate(&candidate);

        assert!(!verdict.valid);
        assert!(matches!(verdict.reason, Some(RejectReason::Collection(_))));
    }

    #[test]
    fn test_collection_variants() {
        for title in [
            "Harry Potter Box Set",
            "The Expanse Omnibus",
            "The Complete Series",
            "The Witcher Books 1-3",
            "A 5-Book Bundle",
        ] {
            let verdict = validate(&book(title, "X", Some("9780000000001")));
            assert!(
                matches!(verdict.reason, Some(RejectReason::Collection(_))),
                "{} should be a collection",
                title
            );
        }
    }

    #[test]
    fn test_non_book_variants() {
        for title in [
            "Dune Journal",
            "Summary of Atomic Habits",
            "Cien años de soledad (Spanish Edition)",
            "Neil Gaiman Presents: Stories",
            "The Big Anthology of Horror",
            "Dune; Dune Messiah; Children of Dune",
        ] {
            let verdict = validate(&book(title, "X", Some("9780000000001")));
            assert!(
                matches!(verdict.reason, Some(RejectReason::NotABook(_))),
                "{} should be a non-book",
                title
            );
        }
    }

    #[test]
    fn test_rule_order_first_failure_reported() {
        // Empty title beats missing author
        assert_eq!(validate(&book("  ", "", None)).reason, Some(RejectReason::EmptyTitle));
        // Missing author beats collection
        assert_eq!(
            validate(&book("Box Set", "", None)).reason,
            Some(RejectReason::NoAuthor)
        );
        // Collection beats missing identifier
        assert!(matches!(
            validate(&book("Omnibus", "X", None)).reason,
            Some(RejectReason::Collection(_))
        ));
    }

    #[test]
    fn test_blank_authors_count_as_missing() {
        let candidate = book("Dune", "   ", Some("9780441013593"));
        assert_eq!(validate(&candidate).reason, Some(RejectReason::NoAuthor));
    }

    #[test]
    fn test_identifier_required() {
        let candidate = book("Dune", "Frank Herbert", None);
        assert_eq!(validate(&candidate).reason, Some(RejectReason::MissingIdentifier));

        let mut with_external = candidate.clone();
        with_external.external_id = Some("B1Hx1AEACAAJ".to_string());
        assert!(validate(&with_external).valid);

        let mut short_isbn = candidate;
        short_isbn.isbn13 = Some("044101359".to_string());
        assert_eq!(validate(&short_isbn).reason, Some(RejectReason::MissingIdentifier));
    }

    #[test]
    fn test_page_count_threshold() {
        let mut candidate = book("Dune", "Frank Herbert", Some("9780441013593"));

        candidate.page_count = Some(50);
        assert_eq!(validate(&candidate).reason, Some(RejectReason::TooShort(50)));

        candidate.page_count = Some(51);
        assert!(validate(&candidate).valid);

        // Zero means unknown, not short
        candidate.page_count = Some(0);
        assert!(validate(&candidate).valid);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let candidates = [
            book("Dune", "Frank Herbert", Some("9780441013593")),
            book("The Stormlight Archive Boxed Set", "X", Some("1234567890123")),
            book("Dune", "", None),
        ];
        for candidate in &candidates {
            assert_eq!(validate(candidate), validate(candidate));
        }
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(RejectReason::TooShort(12).to_string(), "only 12 pages");
        assert_eq!(RejectReason::MissingIdentifier.to_string(), "no ISBN-13 or external id");
    }
}
