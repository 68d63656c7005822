//! Output validation for rewritten text.

use std::fmt;

/// Phrases that mark a refusal or an apology instead of a rewrite.
pub const REFUSAL_PHRASES: &[&str] = &[
    "как искусственный интеллект",
    "как ai",
    "не могу",
    "не способен",
    "ошибка",
    "error",
    "извините",
    "sorry",
    "apologize",
    "я не могу",
    "i cannot",
    "i'm unable",
];

/// Why a candidate rewrite was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Empty,
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    Refusal { phrase: &'static str },
    Unchanged,
    TooSimilar { ratio: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty output"),
            Self::TooShort { len, min } => write!(f, "too short ({len} < {min} chars)"),
            Self::TooLong { len, max } => write!(f, "too long ({len} > {max} chars)"),
            Self::Refusal { phrase } => write!(f, "refusal phrase \"{phrase}\""),
            Self::Unchanged => write!(f, "identical to input"),
            Self::TooSimilar { ratio } => write!(f, "too similar to input (ratio {ratio:.2})"),
        }
    }
}

/// Bounds a candidate has to satisfy.
#[derive(Debug, Clone)]
pub struct OutputBounds {
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub max_similarity: f64,
}

impl Default for OutputBounds {
    fn default() -> Self {
        Self {
            min_ratio: 0.6,
            max_ratio: 1.4,
            max_similarity: 0.9,
        }
    }
}

/// Check `candidate` against `input`. Lengths are counted in characters.
pub fn validate(input: &str, candidate: &str, bounds: &OutputBounds) -> Result<(), Rejection> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(Rejection::Empty);
    }

    let input_len = input.chars().count();
    let len = candidate.chars().count();
    let min = (input_len as f64 * bounds.min_ratio).ceil() as usize;
    let max = (input_len as f64 * bounds.max_ratio).floor() as usize;
    if len < min {
        return Err(Rejection::TooShort { len, min });
    }
    if len > max {
        return Err(Rejection::TooLong { len, max });
    }

    let lowered = candidate.to_lowercase();
    if let Some(phrase) = REFUSAL_PHRASES.iter().find(|p| lowered.contains(*p)) {
        return Err(Rejection::Refusal { phrase });
    }

    if candidate == input.trim() {
        return Err(Rejection::Unchanged);
    }

    let ratio = similarity(input, candidate);
    if ratio > bounds.max_similarity {
        return Err(Rejection::TooSimilar { ratio });
    }

    Ok(())
}

/// Character similarity in `[0, 1]`: `2 * matches / (len_a + len_b)`,
/// where matches are found by recursively taking the longest common block.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut stack = vec![(0, a.len(), 0, b.len())];
    let mut matches = 0;

    while let Some((a_lo, a_hi, b_lo, b_hi)) = stack.pop() {
        let (i, j, size) = longest_match(a, b, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }
        matches += size;
        if a_lo < i && b_lo < j {
            stack.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            stack.push((i + size, a_hi, j + size, b_hi));
        }
    }

    matches
}

/// Longest common run in `a[a_lo..a_hi]` and `b[b_lo..b_hi]`, earliest on ties.
fn longest_match(
    a: &[char],
    b: &[char],
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let width = b_hi - b_lo;
    let mut best = (a_lo, b_lo, 0);
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];

    for i in a_lo..a_hi {
        for j in b_lo..b_hi {
            let k = j - b_lo + 1;
            curr[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            if curr[k] > best.2 {
                best = (i + 1 - curr[k], j + 1 - curr[k], curr[k]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
        curr.iter_mut().for_each(|c| *c = 0);
    }

    best
}
