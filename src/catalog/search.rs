//! Relevance scoring for typo-tolerant catalog search.
//!
//! Pure functions over (query, title, artist); the store feeds candidates
//! through [`relevance`] and orders by descending score.

use super::models::TrackRecord;

/// Minimum edit distance we tolerate per query token, by token length.
/// Short tokens get no fuzz at all so "pop" never matches "top".
fn max_edit_distance(token_len: usize) -> usize {
    match token_len {
        0..=3 => 0,
        4..=6 => 1,
        _ => 2,
    }
}

/// Calculate the Levenshtein (edit) distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // Two rolling rows instead of the full matrix.
    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = if a_char == b_char { 0 } else { 1 };
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}

/// Relevance of a track against a free-text query. Zero means no match.
///
/// Per query token, the best score over all title/artist tokens:
/// exact 100, prefix 60, within edit-distance budget `40 - 15 * distance`.
/// Tokens that match nothing sink the whole query (AND semantics), so
/// multi-word queries stay precise.
pub fn relevance(query: &str, track: &TrackRecord) -> u32 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0;
    }

    let mut field_tokens = tokenize(&track.title);
    field_tokens.extend(tokenize(&track.artist));

    let mut total = 0u32;
    for query_token in &query_tokens {
        let mut best = 0u32;
        for field_token in &field_tokens {
            best = best.max(token_score(query_token, field_token));
        }
        if best == 0 {
            return 0;
        }
        total += best;
    }
    total
}

fn token_score(query_token: &str, field_token: &str) -> u32 {
    if query_token == field_token {
        return 100;
    }
    if field_token.starts_with(query_token) {
        return 60;
    }
    let budget = max_edit_distance(query_token.chars().count());
    if budget == 0 {
        return 0;
    }
    let distance = levenshtein_distance(query_token, field_token);
    if distance <= budget {
        40u32.saturating_sub(15 * distance as u32)
    } else {
        0
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
