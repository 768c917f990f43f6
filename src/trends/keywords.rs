//! Keyword extraction and category assignment.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Category;

pub const MAX_KEYWORDS: usize = 5;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("token regex"));

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "get",
    "got", "had", "has", "have", "he", "her", "his", "how", "if", "in", "into", "is", "it",
    "its", "just", "more", "most", "new", "not", "now", "of", "on", "or", "our", "out", "over",
    "says", "she", "so", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "up", "us", "was", "we", "were", "what", "when", "which", "who",
    "why", "will", "with", "would", "you", "your",
];

/// Ordered: the first category with a matching keyword wins.
const CATEGORY_TABLE: &[(Category, &[&str])] = &[
    (
        Category::Technology,
        &[
            "ai", "software", "chip", "chips", "quantum", "robot", "robotics", "app", "cloud",
            "startup", "rust", "compiler", "compilers", "cyber", "gpu", "smartphone", "tech",
        ],
    ),
    (
        Category::Health,
        &[
            "health", "healthcare", "medical", "vaccine", "disease", "hospital", "drug",
            "cancer", "fitness", "nutrition", "mental",
        ],
    ),
    (
        Category::Finance,
        &[
            "stocks", "stock", "market", "markets", "crypto", "bitcoin", "inflation", "rates",
            "bank", "banks", "fed", "bond", "bonds",
        ],
    ),
    (
        Category::Business,
        &[
            "business", "company", "merger", "acquisition", "ceo", "earnings", "revenue",
            "retail", "layoffs", "ipo",
        ],
    ),
    (
        Category::Science,
        &[
            "science", "research", "researchers", "space", "nasa", "physics", "biology",
            "telescope", "study", "discovery",
        ],
    ),
    (
        Category::Environment,
        &[
            "climate", "environment", "emissions", "renewable", "solar", "wildfire", "carbon",
            "ocean", "energy",
        ],
    ),
    (
        Category::Sports,
        &[
            "match", "league", "goal", "championship", "playoffs", "nba", "nfl", "football",
            "soccer", "tennis", "olympics", "buzzer",
        ],
    ),
    (
        Category::Entertainment,
        &[
            "movie", "film", "music", "album", "series", "celebrity", "streaming", "festival",
            "game", "gaming",
        ],
    ),
];

pub fn is_stop_word(w: &str) -> bool {
    STOP_WORDS.contains(&w)
}

/// Lowercased word tokens, stop-words and single characters removed.
pub fn content_tokens(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() >= 2 && !is_stop_word(t))
        .collect()
}

/// Source-supplied tags first, then title words, then description words.
/// Unique, at most [`MAX_KEYWORDS`].
pub fn extract_keywords(source_tags: &[String], title: &str, description: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(MAX_KEYWORDS);

    let tags = source_tags.iter().flat_map(|t| content_tokens(t));
    let words = content_tokens(title)
        .into_iter()
        .chain(content_tokens(description));

    for kw in tags.chain(words) {
        if out.len() == MAX_KEYWORDS {
            break;
        }
        if seen.insert(kw.clone()) {
            out.push(kw);
        }
    }
    out
}

pub fn categorize(keywords: &[String]) -> Category {
    CATEGORY_TABLE
        .iter()
        .find(|(_, words)| keywords.iter().any(|k| words.contains(&k.as_str())))
        .map(|(c, _)| *c)
        .unwrap_or(Category::General)
}

/// Order-insensitive identity used to spot near-duplicate topics.
pub fn dedup_key(keywords: &[String], topic: &str) -> String {
    if keywords.is_empty() {
        return topic.trim().to_lowercase();
    }
    let set: BTreeSet<&str> = keywords.iter().map(String::as_str).collect();
    set.into_iter().collect::<Vec<_>>().join(" ")
}
