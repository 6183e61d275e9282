use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::ParsingConfig;
use crate::error::{GeneratorError, Result};
use super::extractor::{Extraction, MacroCallExtractor};
use super::languages::RubyParser;

/// A parsed Ruby source file with its extracted macro calls
#[derive(Debug, Clone, Serialize)]
pub struct ParsedFile {
    /// File path as discovered
    pub path: PathBuf,

    /// Content hash for change detection
    pub content_hash: String,

    /// Macro calls and class/module definitions
    #[serde(flatten)]
    pub extraction: Extraction,
}

impl ParsedFile {
    /// Pretty JSON of the extracted calls and definitions
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reads Ruby files and runs the macro call extractor over them
pub struct SourceParser {
    config: ParsingConfig,
    ruby: RubyParser,
}

impl SourceParser {
    pub fn new(config: &ParsingConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            ruby: RubyParser::new()?,
        })
    }

    /// Parse a single source file
    pub fn parse_file<P: AsRef<Path>>(&mut self, file_path: P) -> Result<ParsedFile> {
        let path = file_path.as_ref();

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.config.max_file_size as u64 {
            return Err(GeneratorError::Parser(format!(
                "File {} exceeds maximum size limit",
                path.display()
            )));
        }

        let source = std::fs::read_to_string(path)?;
        self.parse_source(path, &source)
    }

    /// Parse source text that was already read from `path`
    pub fn parse_source(&mut self, path: &Path, source: &str) -> Result<ParsedFile> {
        let tree = self.ruby.parse(source).map_err(|e| match e {
            GeneratorError::Parser(message) => {
                GeneratorError::Parser(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;

        Ok(ParsedFile {
            path: path.to_path_buf(),
            content_hash: calculate_hash(source),
            extraction: MacroCallExtractor::extract(&tree, source),
        })
    }

    /// Determine if a file should be parsed based on configuration
    pub fn should_parse_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                self.config.file_extensions.iter().any(|allowed| allowed == ext)
            })
    }
}

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Namespace;

    fn parser() -> SourceParser {
        SourceParser::new(&ParsingConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_file_extracts_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post.rb");
        std::fs::write(&path, "class Post\n  delegate :name, to: :author\nend\n").unwrap();

        let parsed = parser().parse_file(&path).unwrap();
        assert_eq!(parsed.path, path);
        assert_eq!(parsed.content_hash.len(), 64);

        let post = Namespace::parse("::Post").unwrap();
        assert_eq!(parsed.extraction.calls.get(&post).map(|calls| calls.len()), Some(1));
        assert_eq!(parsed.extraction.definitions.len(), 1);
    }

    #[test]
    fn test_syntax_errors_fail_the_file() {
        let result = parser().parse_source(Path::new("broken.rb"), "class Post\n  delegate :name,\n");
        let error = result.unwrap_err();
        assert!(error.to_string().contains("broken.rb"));
    }

    #[test]
    fn test_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.rb");
        std::fs::write(&path, "# padding\n".repeat(10)).unwrap();

        let config = ParsingConfig {
            max_file_size: 16,
            ..ParsingConfig::default()
        };
        let mut parser = SourceParser::new(&config).unwrap();
        assert!(matches!(parser.parse_file(&path), Err(GeneratorError::Parser(_))));
    }

    #[test]
    fn test_should_parse_file_by_extension() {
        let parser = parser();
        assert!(parser.should_parse_file(Path::new("app/models/post.rb")));
        assert!(!parser.should_parse_file(Path::new("app/models/post.rbs")));
        assert!(!parser.should_parse_file(Path::new("Gemfile")));
    }

    #[test]
    fn test_json_lists_calls_by_namespace() {
        let parsed = parser()
            .parse_source(Path::new("post.rb"), "class Post\n  private\n  cattr_reader :limit\nend\n")
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&parsed.to_json().unwrap()).unwrap();
        let (namespace, calls) = (&json["calls"]["entries"][0][0], &json["calls"]["entries"][0][1]);
        assert_eq!(namespace, "::Post");
        assert_eq!(calls[0]["macro"], "class_accessor");
        assert_eq!(calls[0]["kind"], "reader");
        assert_eq!(calls[0]["private"], true);
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(calculate_hash("abc"), calculate_hash("abc"));
        assert_ne!(calculate_hash("abc"), calculate_hash("abd"));
    }
}
