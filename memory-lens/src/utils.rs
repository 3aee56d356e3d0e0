use crate::types::IMAGE_EXTENSIONS;
use std::path::Path;

/// Path helpers
pub mod path {
    use super::*;

    /// True when the file extension is one of the image extensions, ignoring case.
    pub fn has_image_extension(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }

    /// MIME type for the data URL sent to the captioning service.
    pub fn mime_type_for(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("bmp") => "image/bmp",
            _ => "image/jpeg",
        }
    }

    /// Forward-slash string form of a filesystem path.
    pub fn to_key(path: &Path) -> String {
        crate::types::normalize_image_path(&path.to_string_lossy())
    }
}

/// Text matching helpers
pub mod text {
    /// Lowercase alphanumeric terms, the way a standard analyzer splits text.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
            .map(|term| term.to_lowercase())
            .collect()
    }

    /// Edit budget for a term under AUTO fuzziness: exact up to 2 chars,
    /// one edit up to 5, two beyond.
    pub fn auto_fuzziness(term: &str) -> usize {
        match term.chars().count() {
            0..=2 => 0,
            3..=5 => 1,
            _ => 2,
        }
    }

    pub fn levenshtein(a: &str, b: &str) -> usize {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() {
            return b.len();
        }
        if b.is_empty() {
            return a.len();
        }

        let mut previous: Vec<usize> = (0..=b.len()).collect();
        let mut current = vec![0; b.len() + 1];

        for (i, ca) in a.iter().enumerate() {
            current[0] = i + 1;
            for (j, cb) in b.iter().enumerate() {
                let substitution = previous[j] + usize::from(ca != cb);
                current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
            }
            std::mem::swap(&mut previous, &mut current);
        }

        previous[b.len()]
    }

    /// Truncate to at most `max_chars` characters, marking the cut.
    pub fn truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::path::*;
    use super::text::*;
    use std::path::Path;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(has_image_extension(Path::new("a/b.JPG")));
        assert!(has_image_extension(Path::new("a/b.jpeg")));
        assert!(has_image_extension(Path::new("b.Png")));
        assert!(has_image_extension(Path::new("b.bmp")));
        assert!(!has_image_extension(Path::new("b.gif")));
        assert!(!has_image_extension(Path::new("jpg")));
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_type_for(Path::new("x.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("x.bmp")), "image/bmp");
        assert_eq!(mime_type_for(Path::new("x.jpeg")), "image/jpeg");
    }

    #[test]
    fn edit_distance() {
        assert_eq!(levenshtein("chyld", "child"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    fn fuzzy_term_match(query_term: &str, candidate: &str) -> bool {
        levenshtein(query_term, candidate) <= auto_fuzziness(query_term)
    }

    #[test]
    fn auto_fuzziness_scales_with_length() {
        assert!(fuzzy_term_match("chyld", "child"));
        assert!(fuzzy_term_match("ball", "ball"));
        assert!(!fuzzy_term_match("at", "an"));
        assert!(fuzzy_term_match("playng", "playing"));
        assert!(!fuzzy_term_match("dog", "cat"));
    }

    #[test]
    fn tokenizer_lowercases_and_splits_punctuation() {
        assert_eq!(tokenize("A child, playing-with a Ball!"), vec!["a", "child", "playing", "with", "a", "ball"]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("short", 10), "short");
    }
}
