//! Atlas model and name resolution.
//!
//! The atlas is the single document the runtime consumes: a mapping from
//! package names to ordered lists of sound items. Serialized as a JSON object
//! whose values are arrays of `[source_name, file_name, sample_count,
//! language_tag]` tuples. Package order is insertion order and drives the
//! cross-package fallback in [`Atlas::resolve`].

use serde_json::Value;

use crate::error::SoundError;

/// Language tag meaning "no language / applies to all languages".
pub const NO_LANGUAGE: &str = "_";

/// One sound entry: logical name, content-addressed file, authoritative
/// frame count and language tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasItem {
    pub source_name: String,
    pub file_name: String,
    /// PCM frames per channel as produced by the encoder's normalization
    /// step. Ground truth for buffer allocation; decoders may report
    /// slightly different counts.
    pub sample_count: u64,
    pub language_tag: String,
}

impl AtlasItem {
    pub fn new(
        source_name: impl Into<String>,
        file_name: impl Into<String>,
        sample_count: u64,
        language_tag: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            file_name: file_name.into(),
            sample_count,
            language_tag: language_tag.into(),
        }
    }

    pub fn is_unlocalized(&self) -> bool {
        self.language_tag == NO_LANGUAGE
    }

    /// Resolution predicate: name matches and the item is either unlocalized
    /// or tagged with the requested language.
    fn matches(&self, source_name: &str, language: &str) -> bool {
        self.source_name == source_name
            && (self.language_tag == NO_LANGUAGE || self.language_tag == language)
    }

    fn from_value(package: &str, value: &Value) -> Result<Self, SoundError> {
        let tuple = value.as_array().ok_or_else(|| {
            SoundError::atlas_malformed(format!("item in {package:?} is not an array"))
        })?;
        if tuple.len() < 3 || tuple.len() > 4 {
            return Err(SoundError::atlas_malformed(format!(
                "item in {package:?} has {} elements, expected 3 or 4",
                tuple.len()
            )));
        }
        let source_name = tuple[0].as_str().ok_or_else(|| {
            SoundError::atlas_malformed(format!("source name in {package:?} is not a string"))
        })?;
        let file_name = tuple[1].as_str().ok_or_else(|| {
            SoundError::atlas_malformed(format!("file name for {source_name:?} is not a string"))
        })?;
        let sample_count = tuple[2].as_u64().ok_or_else(|| {
            SoundError::atlas_malformed(format!("sample count for {source_name:?} is not a count"))
        })?;
        if sample_count == 0 {
            return Err(SoundError::atlas_malformed(format!(
                "sample count for {source_name:?} is zero"
            )));
        }
        // Older atlases omit the tag on unlocalized items.
        let language_tag = match tuple.get(3) {
            Some(tag) => tag
                .as_str()
                .ok_or_else(|| {
                    SoundError::atlas_malformed(format!(
                        "language tag for {source_name:?} is not a string"
                    ))
                })?
                .to_string(),
            None => NO_LANGUAGE.to_string(),
        };
        Ok(Self {
            source_name: source_name.to_string(),
            file_name: file_name.to_string(),
            sample_count,
            language_tag,
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.source_name.as_str()),
            Value::from(self.file_name.as_str()),
            Value::from(self.sample_count),
            Value::from(self.language_tag.as_str()),
        ])
    }
}

/// Mapping from package names to their ordered item lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Atlas {
    packages: Vec<(String, Vec<AtlasItem>)>,
}

impl Atlas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Append an item to a package, creating the package at the end of the
    /// insertion order if it does not exist yet.
    pub fn push_item(&mut self, package: &str, item: AtlasItem) {
        match self.packages.iter_mut().find(|(name, _)| name == package) {
            Some((_, items)) => items.push(item),
            None => self.packages.push((package.to_string(), vec![item])),
        }
    }

    pub fn contains(&self, package: &str, source_name: &str, language_tag: &str) -> bool {
        self.items(package).is_some_and(|items| {
            items
                .iter()
                .any(|i| i.source_name == source_name && i.language_tag == language_tag)
        })
    }

    /// Package names in insertion order.
    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn items(&self, package: &str) -> Option<&[AtlasItem]> {
        self.packages
            .iter()
            .find(|(name, _)| name == package)
            .map(|(_, items)| items.as_slice())
    }

    /// Unique language tags appearing in a package, in order of appearance.
    pub fn languages(&self, package: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(items) = self.items(package) {
            for item in items {
                if !out.contains(&item.language_tag) {
                    out.push(item.language_tag.clone());
                }
            }
        }
        out
    }

    /// Source names of items whose tag is in `languages`, in stored order.
    ///
    /// The no-language sentinel is not added implicitly; pass it explicitly
    /// to include unlocalized items.
    pub fn source_names(&self, package: &str, languages: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(items) = self.items(package) {
            for item in items {
                if languages.contains(&item.language_tag.as_str())
                    && !out.contains(&item.source_name)
                {
                    out.push(item.source_name.clone());
                }
            }
        }
        out
    }

    /// First item carrying the given file name, searching packages in
    /// insertion order.
    pub fn find_by_file_name(&self, file_name: &str) -> Option<&AtlasItem> {
        self.packages
            .iter()
            .find_map(|(_, items)| items.iter().find(|i| i.file_name == file_name))
    }

    /// Resolve a source name to its item: first match in the current
    /// package, then cross-package fallback in atlas insertion order.
    ///
    /// Pure with respect to the atlas and arguments.
    pub fn resolve(
        &self,
        source_name: &str,
        package: &str,
        language: &str,
    ) -> Option<&AtlasItem> {
        if let Some(items) = self.items(package) {
            if let Some(hit) = items.iter().find(|i| i.matches(source_name, language)) {
                return Some(hit);
            }
        }
        self.packages
            .iter()
            .filter(|(name, _)| name != package)
            .find_map(|(_, items)| items.iter().find(|i| i.matches(source_name, language)))
    }

    /// Parse an atlas document. Any malformed tuple fails the whole load.
    pub fn from_json_str(text: &str) -> Result<Self, SoundError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SoundError::atlas_malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, SoundError> {
        let object = value
            .as_object()
            .ok_or_else(|| SoundError::atlas_malformed("top level is not an object"))?;
        let mut atlas = Atlas::new();
        for (package, entries) in object {
            let entries = entries.as_array().ok_or_else(|| {
                SoundError::atlas_malformed(format!("package {package:?} is not an array"))
            })?;
            let mut items = Vec::with_capacity(entries.len());
            for entry in entries {
                items.push(AtlasItem::from_value(package, entry)?);
            }
            atlas.packages.push((package.clone(), items));
        }
        Ok(atlas)
    }

    pub fn to_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (package, items) in &self.packages {
            object.insert(
                package.clone(),
                Value::Array(items.iter().map(AtlasItem::to_value).collect()),
            );
        }
        Value::Object(object)
    }

    pub fn to_json_string(&self) -> String {
        // An object of string/number arrays cannot fail to serialize.
        serde_json::to_string_pretty(&self.to_value()).expect("atlas serialization")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_atlas() -> Atlas {
        Atlas::from_json_str(
            r#"{
                "a": [
                    ["hi", "F1", 48000, "en"],
                    ["hi", "F2", 48000, "_"],
                    ["theme", "F3", 96000, "_"]
                ],
                "common": [
                    ["bell", "B", 1000, "_"],
                    ["hello", "H-en", 24000, "en"],
                    ["hello", "H-es", 24000, "es"]
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_items_and_order() {
        let atlas = sample_atlas();
        let text = atlas.to_json_string();
        let reloaded = Atlas::from_json_str(&text).unwrap();
        assert_eq!(atlas, reloaded);
        assert_eq!(reloaded.package_names(), vec!["a", "common"]);
    }

    #[test]
    fn test_three_element_tuples_map_to_no_language() {
        let atlas = Atlas::from_json_str(r#"{"a": [["hi", "F1", 10]]}"#).unwrap();
        let item = &atlas.items("a").unwrap()[0];
        assert_eq!(item.language_tag, NO_LANGUAGE);
    }

    #[test]
    fn test_malformed_tuples_fail_load() {
        assert!(Atlas::from_json_str("[]").is_err());
        assert!(Atlas::from_json_str(r#"{"a": 3}"#).is_err());
        assert!(Atlas::from_json_str(r#"{"a": [["hi", "F1"]]}"#).is_err());
        assert!(Atlas::from_json_str(r#"{"a": [["hi", "F1", "x", "_"]]}"#).is_err());
        assert!(Atlas::from_json_str(r#"{"a": [["hi", "F1", 0, "_"]]}"#).is_err());
        assert!(Atlas::from_json_str(r#"{"a": [[3, "F1", 10, "_"]]}"#).is_err());
    }

    #[test]
    fn test_resolve_prefers_language_match_in_stored_order() {
        let atlas = sample_atlas();
        // "en" item stored before the unlocalized one wins for "en".
        let hit = atlas.resolve("hi", "a", "en").unwrap();
        assert_eq!(hit.file_name, "F1");
        // Any other language falls through to the sentinel item.
        let hit = atlas.resolve("hi", "a", "fr").unwrap();
        assert_eq!(hit.file_name, "F2");
    }

    #[test]
    fn test_resolve_unlocalized_first_wins_regardless_of_language() {
        let atlas = Atlas::from_json_str(
            r#"{"a": [["hi", "F2", 48000, "_"], ["hi", "F1", 48000, "en"]]}"#,
        )
        .unwrap();
        assert_eq!(atlas.resolve("hi", "a", "en").unwrap().file_name, "F2");
        assert_eq!(atlas.resolve("hi", "a", "fr").unwrap().file_name, "F2");
    }

    #[test]
    fn test_resolve_cross_package_fallback_in_insertion_order() {
        let atlas = sample_atlas();
        // "bell" is not in "a"; the fallback walks packages in order.
        let hit = atlas.resolve("bell", "a", "en").unwrap();
        assert_eq!(hit.file_name, "B");
        // Result does not depend on the language selection.
        let hit = atlas.resolve("bell", "a", "zz").unwrap();
        assert_eq!(hit.file_name, "B");
    }

    #[test]
    fn test_resolve_unknown_package_still_falls_back() {
        let atlas = sample_atlas();
        let hit = atlas.resolve("theme", "nope", "en").unwrap();
        assert_eq!(hit.file_name, "F3");
    }

    #[test]
    fn test_resolve_miss_returns_none() {
        let atlas = sample_atlas();
        assert!(atlas.resolve("missing", "a", "en").is_none());
        // Localized item in another package does not match a third language.
        assert!(atlas.resolve("hello", "a", "fr").is_none());
    }

    #[test]
    fn test_enumerations() {
        let atlas = sample_atlas();
        assert_eq!(atlas.languages("a"), vec!["en", "_"]);
        assert_eq!(atlas.languages("common"), vec!["_", "en", "es"]);
        assert_eq!(atlas.source_names("a", &["en"]), vec!["hi"]);
        assert_eq!(atlas.source_names("a", &["en", "_"]), vec!["hi", "theme"]);
        assert!(atlas.source_names("missing", &["en"]).is_empty());
    }

    #[test]
    fn test_find_by_file_name() {
        let atlas = sample_atlas();
        assert_eq!(atlas.find_by_file_name("B").unwrap().source_name, "bell");
        assert!(atlas.find_by_file_name("nope").is_none());
    }
}
