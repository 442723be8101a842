use std::path::Path;

use super::ClassifierError;

/// Class names indexed by model output position, read from a text file
/// with one label per line. Lines may carry a WordNet id prefix
/// (`n02123045 tabby`), which is dropped.
#[derive(Debug, Clone)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::Labels(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_lines(content.lines())
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Self, ClassifierError> {
        let labels: Vec<String> = lines
            .into_iter()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(strip_wordnet_id)
            .map(str::to_string)
            .collect();

        if labels.is_empty() {
            return Err(ClassifierError::Labels("vocabulary is empty".into()));
        }
        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn strip_wordnet_id(line: &str) -> &str {
    match line.split_once(char::is_whitespace) {
        Some((id, rest))
            if id.len() == 9
                && id.starts_with('n')
                && id[1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            rest.trim()
        }
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_and_wordnet_lines() {
        let vocab =
            LabelVocabulary::from_lines(["tabby", "n02085620 Chihuahua", "", "  teapot  "]).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.get(0), Some("tabby"));
        assert_eq!(vocab.get(1), Some("Chihuahua"));
        assert_eq!(vocab.get(2), Some("teapot"));
        assert_eq!(vocab.get(3), None);
    }

    #[test]
    fn labels_with_spaces_are_kept_whole() {
        let vocab = LabelVocabulary::from_lines(["German shepherd"]).unwrap();
        assert_eq!(vocab.get(0), Some("German shepherd"));
    }

    #[test]
    fn empty_vocabulary_is_an_error() {
        assert!(LabelVocabulary::from_lines(["", "  "]).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tabby\ntiger_cat").unwrap();
        let vocab = LabelVocabulary::load(file.path()).unwrap();
        assert_eq!(vocab.get(1), Some("tiger_cat"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = LabelVocabulary::load(Path::new("/nonexistent/labels.txt")).unwrap_err();
        assert!(matches!(err, ClassifierError::Labels(_)));
    }
}
