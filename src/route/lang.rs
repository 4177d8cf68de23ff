use std::path::PathBuf;

/// Where a language suffix is inserted into the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LangPos {
    /// `index.html` becomes `index.fr.html`.
    Before,
    /// `index.html` becomes `index.html.fr`.
    After,
}

/// A per-language definition: a path suffix, a content directory, or both.
#[derive(Debug, Clone)]
pub struct Lang {
    pub suffix: Option<String>,
    pub path: Option<PathBuf>,
    pub pos: LangPos,
}

impl Lang {
    pub fn suffix(suffix: &str, pos: LangPos) -> Lang {
        Lang {
            suffix: Some(suffix.to_owned()),
            path: None,
            pos,
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Lang {
        Lang {
            suffix: None,
            path: Some(path.into()),
            pos: LangPos::After,
        }
    }
}

/// Select the best language from an `Accept-Language` header value.
///
/// Entries are taken in declared order with their quality weights; the
/// first configured language wins ties.
pub fn select_language<'a>(
    accept: Option<&str>,
    languages: &'a std::collections::HashMap<String, Lang>,
    default_language: Option<&str>,
) -> Option<(&'a str, &'a Lang)> {
    if languages.is_empty() {
        return None;
    }

    let mut candidates: Vec<(&str, f32)> = Vec::new();

    if let Some(accept) = accept {
        for entry in accept.split(',') {
            let mut parts = entry.trim().split(';');
            let tag = parts.next().unwrap_or("").trim();
            if tag.is_empty() {
                continue;
            }

            let q = parts
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);

            candidates.push((tag, q));
        }
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }

    for (tag, _) in &candidates {
        // Exact tag first, then the primary subtag ("en-GB" -> "en").
        if let Some((key, lang)) = languages.get_key_value(*tag) {
            return Some((key.as_str(), lang));
        }
        let primary = tag.split('-').next().unwrap_or(tag);
        if let Some((key, lang)) = languages.get_key_value(primary) {
            return Some((key.as_str(), lang));
        }
    }

    let fallback = default_language?;
    languages
        .get_key_value(fallback)
        .map(|(key, lang)| (key.as_str(), lang))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn table() -> HashMap<String, Lang> {
        let mut languages = HashMap::new();
        languages.insert("en".to_owned(), Lang::suffix("en", LangPos::Before));
        languages.insert("fr".to_owned(), Lang::suffix("fr", LangPos::Before));
        languages
    }

    #[test]
    fn picks_highest_quality() {
        let languages = table();
        let (tag, _) = select_language(Some("fr;q=0.8, en;q=0.9"), &languages, None).unwrap();
        assert_eq!(tag, "en");
    }

    #[test]
    fn falls_back_to_primary_subtag() {
        let languages = table();
        let (tag, _) = select_language(Some("fr-CA"), &languages, None).unwrap();
        assert_eq!(tag, "fr");
    }

    #[test]
    fn uses_default_when_nothing_matches() {
        let languages = table();
        let (tag, _) = select_language(Some("de"), &languages, Some("en")).unwrap();
        assert_eq!(tag, "en");
        assert!(select_language(Some("de"), &languages, None).is_none());
    }
}
