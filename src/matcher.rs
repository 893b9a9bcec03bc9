//! Author-name comparison used to filter catalog hits.

use itertools::Itertools;

pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .join(" ")
}

pub fn matches(query: &str, candidate: &str) -> bool {
    matches_with(query, candidate, DEFAULT_THRESHOLD)
}

/// Exact, then containment, then initials, then similarity >= `threshold`.
pub fn matches_with(query: &str, candidate: &str, threshold: f64) -> bool {
    let a = normalize(query);
    let b = normalize(candidate);
    if a == b {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    if abbreviates(&a, &b) || abbreviates(&b, &a) {
        return true;
    }
    similarity(&a, &b) >= threshold
}

/// Symmetric ratio in [0, 1]: the better of the plain and the token-sorted
/// character overlap (2 * LCS / total length).
pub fn similarity(a: &str, b: &str) -> f64 {
    let sorted = |s: &str| s.split_whitespace().sorted().join(" ");
    indel_ratio(a, b).max(indel_ratio(&sorted(a), &sorted(b)))
}

fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * lcs_len(&a, &b) as f64 / total as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// `short` is an initialed form of `long`: same surname, and each given
/// token of `short` is either the full token, its initial, or a run of
/// initials ("js" for "john stuart").
fn abbreviates(short: &str, long: &str) -> bool {
    let s: Vec<&str> = short.split_whitespace().collect();
    let l: Vec<&str> = long.split_whitespace().collect();
    let (Some((s_last, s_given)), Some((l_last, l_given))) = (s.split_last(), l.split_last()) else {
        return false;
    };
    if s_last != l_last || s_last.chars().count() < 2 || s_given.is_empty() {
        return false;
    }
    let mut idx = 0;
    for token in s_given {
        let Some(full) = l_given.get(idx) else {
            return false;
        };
        if token == full {
            idx += 1;
            continue;
        }
        let initials: Vec<char> = token.chars().collect();
        if initials.len() == 1 && full.starts_with(initials[0]) {
            idx += 1;
            continue;
        }
        let run = initials.len();
        if run <= 3
            && idx + run <= l_given.len()
            && initials
                .iter()
                .zip(&l_given[idx..idx + run])
                .all(|(c, t)| t.starts_with(*c))
        {
            idx += run;
            continue;
        }
        return false;
    }
    idx == l_given.len()
}
