//! Tag extraction and loudness tag parsing.
//!
//! Vorbis comments (used by all three codec families) are collected from the
//! decoder library's metadata log into a flat list. Lookups are
//! case-insensitive and the first non-empty match wins.

use std::sync::OnceLock;

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    symphonia::core::{formats::FormatReader, meta::MetadataRevision},
};

/// Standard descriptive tags of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardTags {
    /// Track artist.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Track title.
    pub title: Option<String>,
    /// Track number, as written in the tag.
    pub track_number: Option<String>,
    /// Total tracks, as written in the tag.
    pub track_total: Option<String>,
}

/// Ordered list of raw `KEY=value` comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    entries: Vec<(String, String)>,
}

impl TagList {
    /// Builds a tag list from key/value pairs.
    pub fn new<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Collects every tag a format reader has seen so far.
    ///
    /// # Arguments
    ///
    /// * `format` - The opened format reader.
    ///
    /// # Returns
    ///
    /// All tags of all metadata revisions, oldest revision first.
    pub fn from_format(format: &mut dyn FormatReader) -> Self {
        let mut list = Self::default();
        let mut metadata = format.metadata();

        if let Some(revision) = metadata.current() {
            list.extend_from_revision(revision);
        }
        while !metadata.is_latest() {
            metadata.pop();
            if let Some(revision) = metadata.current() {
                list.extend_from_revision(revision);
            }
        }

        list
    }

    fn extend_from_revision(&mut self, revision: &MetadataRevision) {
        self.entries.extend(
            revision
                .tags()
                .iter()
                .map(|tag| (tag.key.clone(), tag.value.to_string())),
        );
    }

    /// Looks up a tag.
    ///
    /// # Arguments
    ///
    /// * `key` - Tag name, compared case-insensitively.
    ///
    /// # Returns
    ///
    /// The first non-empty value stored under `key`.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.trim().is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// First match among several aliases of the same tag.
    #[must_use]
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.first(key))
    }

    /// Extracts the standard descriptive tags.
    #[must_use]
    pub fn standard(&self) -> StandardTags {
        let owned = |keys: &[&str]| self.first_of(keys).map(str::to_string);
        StandardTags {
            artist: owned(&["ARTIST"]),
            album: owned(&["ALBUM"]),
            title: owned(&["TITLE"]),
            track_number: owned(&["TRACKNUMBER"]),
            track_total: owned(&["TRACKTOTAL", "TOTALTRACKS"]),
        }
    }

    /// Number of stored tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tags are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn replaygain_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*([+-]?\d+(?:\.\d+)?)\s*(?:db)?\s*$").ok())
        .as_ref()
}

/// Parses a ReplayGain value such as `-6.20 dB`.
///
/// # Returns
///
/// The gain in dB, or `None` if the value is malformed.
#[must_use]
pub fn parse_replaygain(value: &str) -> Option<f32> {
    let captures = replaygain_pattern()?.captures(value)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Parses an R128 gain tag, a signed Q7.8 fixed-point dB value.
///
/// # Returns
///
/// The gain in dB, or `None` if the value is not an integer in `i16` range.
#[must_use]
pub fn parse_r128(value: &str) -> Option<f32> {
    let q78: i16 = value.trim().parse().ok()?;
    Some(f32::from(q78) / 256.0)
}

#[cfg(test)]
mod tests {
    use crate::audio::metadata::{TagList, parse_r128, parse_replaygain};

    #[test]
    fn test_first_match_is_case_insensitive() {
        let tags = TagList::new([
            ("title", "First"),
            ("TITLE", "Second"),
            ("Artist", ""),
            ("ARTIST", "Someone"),
        ]);
        assert_eq!(tags.first("Title"), Some("First"));
        assert_eq!(tags.first("artist"), Some("Someone"));
        assert_eq!(tags.first("album"), None);
    }

    #[test]
    fn test_standard_tags_never_empty() {
        let tags = TagList::new([
            ("ALBUM", "   "),
            ("tracknumber", "3"),
            ("TOTALTRACKS", "12"),
        ]);
        let standard = tags.standard();
        assert_eq!(standard.album, None);
        assert_eq!(standard.artist, None);
        assert_eq!(standard.track_number.as_deref(), Some("3"));
        assert_eq!(standard.track_total.as_deref(), Some("12"));
    }

    #[test]
    fn test_parse_replaygain() {
        assert_eq!(parse_replaygain("-6.20 dB"), Some(-6.2));
        assert_eq!(parse_replaygain("+2 db"), Some(2.0));
        assert_eq!(parse_replaygain("1.5"), Some(1.5));
        assert_eq!(parse_replaygain("loud"), None);
        assert_eq!(parse_replaygain(""), None);
    }

    #[test]
    fn test_parse_r128() {
        assert_eq!(parse_r128("512"), Some(2.0));
        assert_eq!(parse_r128("-384"), Some(-1.5));
        assert_eq!(parse_r128("70000"), None);
        assert_eq!(parse_r128("x"), None);
    }
}
