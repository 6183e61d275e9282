use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GeneratorError, Result};

/// Config file names probed, in order, when no `--config` is given
pub const CONFIG_CANDIDATES: [&str; 3] = [
    "RbsActivesupport.toml",
    "rbs_activesupport.toml",
    ".rbs_activesupport.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project layout
    pub project: ProjectConfig,

    /// Ruby source parsing configuration
    pub parsing: ParsingConfig,

    /// Existing RBS signatures used for type lookups
    pub signatures: SignatureConfig,

    /// Declaration generation settings
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Source directories to analyze
    pub source_dirs: Vec<PathBuf>,

    /// Paths to ignore, gitignore syntax
    pub ignore_patterns: Vec<String>,

    /// Directory generated signatures are written to
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// File extensions treated as Ruby sources
    pub file_extensions: Vec<String>,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Directories scanned for `*.rbs` files
    pub dirs: Vec<PathBuf>,

    /// Load the bundled core library signatures
    pub include_core: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Files processed concurrently, 0 picks the available parallelism
    pub parallelism: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_dirs: vec![PathBuf::from("app"), PathBuf::from("lib")],
            ignore_patterns: vec![
                "vendor/".to_string(),
                "tmp/".to_string(),
                "node_modules/".to_string(),
                ".git/".to_string(),
            ],
            output_dir: PathBuf::from("sig/activesupport"),
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            file_extensions: vec!["rb".to_string()],
            max_file_size: 1024 * 1024, // 1MB
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("sig")],
            include_core: true,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { parallelism: 0 }
    }
}

impl GenerationConfig {
    /// Number of worker slots to use
    pub fn worker_count(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }

        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| GeneratorError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GeneratorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(GeneratorError::Config(format!(
                        "config file {} does not exist",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                for candidate in &CONFIG_CANDIDATES {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[project]
source_dirs = ["app/models"]

[generation]
parallelism = 2
"#,
        )
        .unwrap();

        assert_eq!(config.project.source_dirs, vec![PathBuf::from("app/models")]);
        assert_eq!(config.project.output_dir, PathBuf::from("sig/activesupport"));
        assert_eq!(config.parsing.file_extensions, vec!["rb".to_string()]);
        assert!(config.signatures.include_core);
        assert_eq!(config.generation.worker_count(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbs_activesupport.toml");

        let mut config = Config::default();
        config.signatures.dirs = vec![PathBuf::from("sig"), PathBuf::from("vendor/sig")];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.signatures.dirs, config.signatures.dirs);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let result = Config::load_or_default(Some("does/not/exist.toml"));
        assert!(matches!(result, Err(GeneratorError::Config(_))));
    }
}
