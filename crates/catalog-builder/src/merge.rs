//! Improve-only merge rules shared by the master store and the genre pools.

use shared::{normalize_text, CanonicalBook};

/// Whether `incoming` should replace `existing`'s metadata: it brings a real
/// cover where there was none, or a strictly higher rating.
pub fn is_improvement(existing: &CanonicalBook, incoming: &CanonicalBook) -> bool {
    let better_cover = incoming.has_real_cover() && !existing.has_real_cover();
    let better_rating = incoming.average_rating > existing.average_rating;
    better_cover || better_rating
}

/// Same work by normalized title and primary author, whatever the editions'
/// ISBNs say.
pub fn same_title_author(a: &CanonicalBook, b: &CanonicalBook) -> bool {
    normalize_text(&a.title) == normalize_text(&b.title)
        && normalize_text(a.primary_author()) == normalize_text(b.primary_author())
}

/// Overwrite `existing`'s metadata with `incoming`'s, keeping its identity,
/// first-seen time and genre set (which only grows).
pub fn absorb(existing: &mut CanonicalBook, incoming: &CanonicalBook) {
    existing.title = incoming.title.clone();
    existing.authors = incoming.authors.clone();
    if existing.isbn13.is_none() {
        existing.isbn13 = incoming.isbn13.clone();
    }
    if incoming.has_real_cover() || !existing.has_real_cover() {
        existing.cover_url = incoming.cover_url.clone();
    }
    if !incoming.description.is_empty() {
        existing.description = incoming.description.clone();
    }
    existing.average_rating = existing.average_rating.max(incoming.average_rating);
    existing.ratings_count = existing.ratings_count.max(incoming.ratings_count);
    existing.published_date = incoming
        .published_date
        .clone()
        .or(existing.published_date.take());
    existing.page_count = incoming.page_count.or(existing.page_count);
    existing.publisher = incoming.publisher.clone().or(existing.publisher.take());
    existing.external_id = incoming.external_id.clone().or(existing.external_id.take());
    existing.genres.extend(incoming.genres.iter().cloned());
    existing.last_verified_at = incoming.last_verified_at.max(existing.last_verified_at);
}

/// Counts from one [`merge_into_pool`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub improved: usize,
    pub kept: usize,
}

/// Additively merge `incoming` into `pool`.
///
/// Books match on ISBN-13 first, then on normalized title and author.
/// Matches replace the stored record only when they improve it; everything
/// else is appended. The pool never shrinks.
pub fn merge_into_pool(pool: &mut Vec<CanonicalBook>, incoming: Vec<CanonicalBook>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for book in incoming {
        let matched = pool
            .iter()
            .position(|stored| match (&stored.isbn13, &book.isbn13) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            })
            .or_else(|| pool.iter().position(|stored| same_title_author(stored, &book)));

        match matched {
            Some(index) if is_improvement(&pool[index], &book) => {
                absorb(&mut pool[index], &book);
                outcome.improved += 1;
            }
            Some(index) => {
                pool[index].genres.extend(book.genres.iter().cloned());
                outcome.kept += 1;
            }
            None => {
                pool.push(book);
                outcome.added += 1;
            }
        }
    }

    outcome
}
