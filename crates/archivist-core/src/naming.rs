//! Display names, titles and file names.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::workspace::ContentStats;

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("hard-coded pattern compiles"));
    };
}

regex!(LEADING_SEQUENCE, r"^\d+[_\s-]+");
regex!(HASH_TAG, r"#[^#]*#");
regex!(PHOTO_VIDEO_COUNT, r"\d+P\d*V?");
regex!(PHOTO_PREFIX_COUNT, r"P\d+");
regex!(SIZE_WITH_UNIT, r"(?i)\d+(?:\.\d+)?\s*(?:KB|MB|GB|TB)\b");
regex!(SIZE_BARE, r"(?i)\d+(?:\.\d+)?\s*[MGT]?B\b");
regex!(SIZE_UNDERSCORED, r"(?i)_\d+[MGT]?B_?");
regex!(SQUARE_BRACKETS, r"\[[^\]]*\]");
regex!(LENTICULAR_BRACKETS, r"【[^】]*】");
regex!(CORNER_BRACKETS, r"「[^」]*」");
regex!(WHITE_CORNER_BRACKETS, r"『[^』]*』");
regex!(NUMBERED_TAG, r"\d+_[A-Za-z0-9\p{Han}]+");
regex!(DISALLOWED, r"[^\w\s\p{Han}\-()\[\]（）【】「」『』]");
regex!(WHITESPACE, r"\s+");
regex!(TRAILING_SEPARATORS, r"[-_\s]+$");

/// Characters that are not allowed in file names on common filesystems.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// Strip release-group noise from a raw archive or folder name.
///
/// Falls back to `unnamed_<unix ts>` when nothing is left.
pub fn clean_name(raw: &str) -> String {
    let mut name = LEADING_SEQUENCE.replace(raw, "").into_owned();
    name = HASH_TAG.replace_all(&name, "").into_owned();
    name = PHOTO_VIDEO_COUNT.replace_all(&name, "").into_owned();
    name = PHOTO_PREFIX_COUNT.replace_all(&name, "").into_owned();
    for size in [&*SIZE_WITH_UNIT, &*SIZE_BARE, &*SIZE_UNDERSCORED] {
        name = size.replace_all(&name, "").into_owned();
    }
    for bracket in [
        &*SQUARE_BRACKETS,
        &*LENTICULAR_BRACKETS,
        &*CORNER_BRACKETS,
        &*WHITE_CORNER_BRACKETS,
    ] {
        name = bracket.replace_all(&name, "").into_owned();
    }
    name = NUMBERED_TAG.replace_all(&name, "").into_owned();
    name = DISALLOWED.replace_all(&name, "").into_owned();
    name = WHITESPACE.replace_all(&name, " ").into_owned();
    name = TRAILING_SEPARATORS.replace(&name, "").into_owned();

    let name = name.trim();
    if name.is_empty() {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        return format!("unnamed_{ts}");
    }
    name.to_string()
}

/// Replace unsafe characters with `_` and cap the length in characters.
pub fn safe_file_name(title: &str, max_len: usize) -> String {
    title
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .take(max_len)
        .collect()
}

/// `<name> [<N>P - <M>MB]`, or `[<N>P+<V>V - <M>MB]` when videos are present.
pub fn title_with_stats(name: &str, stats: &ContentStats) -> String {
    let mb = stats.total_mb();
    if stats.video_count > 0 {
        format!("{name} [{}P+{}V - {mb}MB]", stats.image_count, stats.video_count)
    } else {
        format!("{name} [{}P - {mb}MB]", stats.image_count)
    }
}

/// One run of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalChunk {
    Number(u64),
    Text(String),
}

/// Sort key that orders `img2` before `img10`.
///
/// Text runs compare case-insensitively.
pub fn natural_sort_key(s: &str) -> Vec<NaturalChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in s.chars() {
        let is_digit = c.is_ascii_digit();
        if is_digit != in_digits && !current.is_empty() {
            chunks.push(chunk(&current, in_digits));
            current.clear();
        }
        in_digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(chunk(&current, in_digits));
    }
    chunks
}

fn chunk(run: &str, digits: bool) -> NaturalChunk {
    if digits {
        NaturalChunk::Number(run.parse().unwrap_or(u64::MAX))
    } else {
        NaturalChunk::Text(run.to_lowercase())
    }
}
