//! Stack-name generator (spec §4.3): derives a URL-safe slug from a commit
//! subject, with a random collision-breaking suffix when the slug is
//! already taken.

use rand::Rng;

const MAX_LEN: usize = 40;
const FALLBACK: &str = "stack";
const SUFFIX_LEN: usize = 4;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Lowercase, collapse runs of non-`[a-z0-9]` to a single `-`, trim leading
/// and trailing `-`, truncate to 40 chars (backing off to the previous `-`
/// when one exists), and fall back to `"stack"` if the result is empty.
pub fn generate(subject: &str) -> String {
    let lower = subject.to_lowercase();

    let mut slug = String::with_capacity(lower.len());
    let mut prev_was_dash = false;
    for ch in lower.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
            prev_was_dash = false;
        } else if !prev_was_dash {
            slug.push('-');
            prev_was_dash = true;
        }
    }

    let slug = slug.trim_matches('-').to_string();

    let slug = if slug.chars().count() > MAX_LEN {
        truncate(&slug, MAX_LEN)
    } else {
        slug
    };

    if slug.is_empty() {
        FALLBACK.to_string()
    } else {
        slug
    }
}

/// Truncate to `max_len` chars; if the cut lands mid-word, back off to the
/// previous `-` (dropping it too), else leave the raw cut. Truncation never
/// leaves a trailing `-`.
fn truncate(slug: &str, max_len: usize) -> String {
    let cut: String = slug.chars().take(max_len).collect();
    match cut.rfind('-') {
        Some(idx) if idx + 1 < cut.len() => cut[..idx].to_string(),
        _ => cut.trim_end_matches('-').to_string(),
    }
}

/// Four random lowercase letters, used to break a name collision.
pub fn generate_suffix(rng: &mut impl Rng) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Derive a stack name that isn't already in use for `target`, retrying with
/// fresh `-<suffix>` suffixes up to `max_attempts` times. `name_taken` should
/// report whether a `NamedStackRef` for `target` already uses the candidate
/// name.
pub fn unique_name(
    target: &str,
    subject: &str,
    max_attempts: u32,
    rng: &mut impl Rng,
    name_taken: impl Fn(&str, &str) -> bool,
) -> crate::error::Result<String> {
    let base = generate(subject);
    if !name_taken(target, &base) {
        return Ok(base);
    }

    for _ in 0..max_attempts {
        let candidate = format!("{base}-{}", generate_suffix(rng));
        if !name_taken(target, &candidate) {
            return Ok(candidate);
        }
    }

    Err(crate::error::JasprError::StackNameExhausted {
        attempts: max_attempts,
    })
}
