use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, CONFIG_CANDIDATES};
use crate::error::GeneratorError;
use super::env::{Environment, EnvironmentLoader};
use super::generator::{Generator, UnitOutput};
use super::parser::{calculate_hash, ParsedFile, SourceParser};

/// Options of one `generate` run
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Source directories; the configured ones when empty
    pub sources: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    /// Rewrite outputs even when unchanged
    pub force: bool,
    /// Write nothing, fail when any output would change
    pub check: bool,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub parsed: usize,
    pub failed: usize,
    pub generated: usize,
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Outputs that would change, filled in check mode only
    pub outdated: Vec<PathBuf>,
}

/// Drives discovery, parsing, environment loading and generation
pub struct Engine {
    config: Config,
    root: PathBuf,
}

impl Engine {
    /// Create an engine rooted at the current directory
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);

        let root = std::env::current_dir().context("Failed to determine the current directory")?;
        Ok(Self::with_config(config, root))
    }

    pub fn with_config(config: Config, root: PathBuf) -> Self {
        Self { config, root }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Write the default configuration file
    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<PathBuf> {
        let target_dir = path.map(|p| self.resolve(&p)).unwrap_or_else(|| self.root.clone());
        let config_path = target_dir.join(CONFIG_CANDIDATES[0]);

        if config_path.exists() && !force {
            bail!(
                "{} already exists, use --force to overwrite it",
                config_path.display()
            );
        }

        tokio::fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        Config::default().save(&config_path)?;

        info!("📝 Wrote {}", config_path.display());
        Ok(config_path)
    }

    /// Generate signatures for every Ruby file under the source directories
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerationSummary> {
        let source_dirs = self.source_dirs(&options.sources);
        let output_dir = self.resolve(options.output.as_ref().unwrap_or(&self.config.project.output_dir));

        info!("🔍 Scanning {} source directories", source_dirs.len());
        let files = self.discover(&source_dirs)?;
        info!("Found {} Ruby files", files.len());

        let (parsed, failed) = self.parse_all(files).await?;

        let env = Arc::new(self.load_environment(&parsed, &output_dir)?);
        info!("📚 Type environment has {} declarations", env.len());

        let generator = Arc::new(Generator::new(env)?);
        let mut summary = GenerationSummary {
            parsed: parsed.len(),
            failed,
            ..GenerationSummary::default()
        };

        let outputs = self.generate_all(generator, parsed).await?;
        for (path, output) in outputs {
            let target = self.output_path(&path, &source_dirs, &output_dir);
            match output {
                UnitOutput::Signatures(content) => {
                    summary.generated += 1;
                    self.write_output(&target, &content, &options, &mut summary).await?;
                }
                UnitOutput::Empty => self.remove_output(&target, &options, &mut summary).await?,
                // the last good output stays, as for files that fail to parse
                UnitOutput::Failed => summary.failed += 1,
            }
        }

        for stale in self.orphaned_outputs(&source_dirs, &output_dir) {
            self.remove_output(&stale, &options, &mut summary).await?;
        }

        info!(
            "✅ Parsed {} files ({} failed), generated {}, wrote {}, unchanged {}, removed {}",
            summary.parsed,
            summary.failed,
            summary.generated,
            summary.written,
            summary.unchanged,
            summary.removed
        );

        if options.check && !summary.outdated.is_empty() {
            for path in &summary.outdated {
                warn!("Outdated: {}", path.display());
            }
            bail!("{} signature files are out of date", summary.outdated.len());
        }

        Ok(summary)
    }

    /// Generated RBS for a single file, `None` when it defines nothing
    ///
    /// Definitions from every configured source file are loaded, so the
    /// output matches what `generate` writes for the same file.
    pub async fn show(&self, file: &Path) -> Result<Option<String>> {
        let parsed = self.parse_one(file)?;

        let source_dirs = self.source_dirs(&[]);
        let others: Vec<PathBuf> = self
            .discover(&source_dirs)?
            .into_iter()
            .filter(|path| path != &parsed.path)
            .collect();
        let (mut units, _) = self.parse_all(others).await?;
        let shown = units.len();
        units.push(parsed);

        let output_dir = self.resolve(&self.config.project.output_dir);
        let env = self.load_environment(&units, &output_dir)?;

        let generator = Generator::new(Arc::new(env))?;
        Ok(generator.generate(&units[shown])?)
    }

    /// Macro calls and definitions extracted from a single file
    pub async fn inspect(&self, file: &Path) -> Result<ParsedFile> {
        self.parse_one(file)
    }

    /// Resolved source directories, the configured ones when `sources` is empty
    fn source_dirs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
        let dirs: &[PathBuf] = if sources.is_empty() {
            &self.config.project.source_dirs
        } else {
            sources
        };
        dirs.iter().map(|dir| self.resolve(dir)).collect()
    }

    fn parse_one(&self, file: &Path) -> Result<ParsedFile> {
        let path = self.resolve(file);
        let mut parser = SourceParser::new(&self.config.parsing)?;
        parser
            .parse_file(&path)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Ruby files below `source_dirs`, honoring gitignore and ignore patterns
    fn discover(&self, source_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let parser = SourceParser::new(&self.config.parsing)?;
        let mut files = Vec::new();

        for dir in source_dirs {
            if !dir.is_dir() {
                warn!("Source directory {} does not exist", dir.display());
                continue;
            }

            let mut overrides = OverrideBuilder::new(dir);
            for pattern in &self.config.project.ignore_patterns {
                overrides
                    .add(&format!("!{}", pattern))
                    .map_err(|e| GeneratorError::Config(format!("Invalid ignore pattern {}: {}", pattern, e)))?;
            }
            let overrides = overrides
                .build()
                .map_err(|e| GeneratorError::Config(e.to_string()))?;

            let walker = WalkBuilder::new(dir)
                .hidden(false)
                .git_ignore(true)
                .overrides(overrides)
                .build();

            for entry in walker {
                let entry = entry.map_err(|e| GeneratorError::FileSystem(e.to_string()))?;
                let path = entry.path();

                if path.is_file() && parser.should_parse_file(path) {
                    files.push(path.to_path_buf());
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Parse files on blocking workers; failed files are logged and counted
    async fn parse_all(&self, files: Vec<PathBuf>) -> Result<(Vec<ParsedFile>, usize)> {
        let semaphore = Arc::new(Semaphore::new(self.config.generation.worker_count()));
        let mut tasks = JoinSet::new();

        for (index, path) in files.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let parsing = self.config.parsing.clone();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = SourceParser::new(&parsing).and_then(|mut parser| parser.parse_file(&path));
                (index, path, result)
            });
        }

        let mut parsed = Vec::new();
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (index, path, result) = joined.context("Parser task panicked")?;
            match result {
                Ok(file) => parsed.push((index, file)),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        parsed.sort_by_key(|(index, _)| *index);
        Ok((parsed.into_iter().map(|(_, file)| file).collect(), failed))
    }

    fn load_environment(&self, parsed: &[ParsedFile], output_dir: &Path) -> Result<Environment> {
        let mut loader = EnvironmentLoader::new();
        if self.config.signatures.include_core {
            loader = loader.with_core()?;
        }

        for dir in &self.config.signatures.dirs {
            let dir = self.resolve(dir);
            let loaded = loader
                .add_signature_dir(&dir, Some(output_dir))
                .with_context(|| format!("Failed to load signatures from {}", dir.display()))?;
            debug!("Loaded {} signature files from {}", loaded, dir.display());
        }

        loader.add_source_definitions(parsed.iter().flat_map(|file| file.extraction.definitions.iter()));
        Ok(loader.build())
    }

    async fn generate_all(
        &self,
        generator: Arc<Generator>,
        parsed: Vec<ParsedFile>,
    ) -> Result<Vec<(PathBuf, UnitOutput)>> {
        let semaphore = Arc::new(Semaphore::new(self.config.generation.worker_count()));
        let mut tasks = JoinSet::new();

        for (index, file) in parsed.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let generator = Arc::clone(&generator);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let output = generator.generate_or_warn(&file);
                (index, file.path, output)
            });
        }

        let mut outputs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, path, output) = joined.context("Generator task panicked")?;
            outputs.push((index, path, output));
        }

        outputs.sort_by_key(|(index, _, _)| *index);
        Ok(outputs.into_iter().map(|(_, path, output)| (path, output)).collect())
    }

    /// `<output_dir>/<source path relative to the project root>.rbs`
    fn output_path(&self, source: &Path, source_dirs: &[PathBuf], output_dir: &Path) -> PathBuf {
        let relative = source
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| source_dirs.iter().find_map(|dir| source.strip_prefix(dir).ok()))
            .unwrap_or(source);

        output_dir.join(relative).with_extension("rbs")
    }

    /// Outputs whose source file under one of `source_dirs` no longer exists
    fn orphaned_outputs(&self, source_dirs: &[PathBuf], output_dir: &Path) -> Vec<PathBuf> {
        if !output_dir.is_dir() {
            return Vec::new();
        }

        let mut orphaned: Vec<PathBuf> = WalkDir::new(output_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("rbs"))
            .filter(|path| {
                let Ok(relative) = path.strip_prefix(output_dir) else {
                    return false;
                };
                let candidates: Vec<PathBuf> = self
                    .config
                    .parsing
                    .file_extensions
                    .iter()
                    .map(|ext| self.root.join(relative).with_extension(ext))
                    .collect();

                let in_scope = candidates
                    .iter()
                    .any(|candidate| source_dirs.iter().any(|dir| candidate.starts_with(dir)));
                in_scope && !candidates.iter().any(|candidate| candidate.exists())
            })
            .collect();

        orphaned.sort();
        orphaned
    }

    async fn write_output(
        &self,
        target: &Path,
        content: &str,
        options: &GenerateOptions,
        summary: &mut GenerationSummary,
    ) -> Result<()> {
        let existing = tokio::fs::read_to_string(target).await.ok();
        let unchanged = existing
            .as_deref()
            .map_or(false, |existing| calculate_hash(existing) == calculate_hash(content));

        if unchanged && (options.check || !options.force) {
            summary.unchanged += 1;
            return Ok(());
        }

        if options.check {
            summary.outdated.push(target.to_path_buf());
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(target, content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        debug!("Wrote {}", target.display());
        summary.written += 1;
        Ok(())
    }

    async fn remove_output(
        &self,
        target: &Path,
        options: &GenerateOptions,
        summary: &mut GenerationSummary,
    ) -> Result<()> {
        if !target.is_file() {
            return Ok(());
        }

        if options.check {
            summary.outdated.push(target.to_path_buf());
            return Ok(());
        }

        tokio::fs::remove_file(target)
            .await
            .with_context(|| format!("Failed to remove {}", target.display()))?;

        info!("🗑️ Removed stale {}", target.display());
        summary.removed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const POST: &str = r#"class Post
  delegate :size, to: :title
  cattr_accessor :per_page
end
"#;

    const POST_SIGNATURE: &str = "class Post\n  def title: () -> String\nend\n";

    fn project() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app/models")).unwrap();
        fs::create_dir_all(dir.path().join("sig")).unwrap();
        fs::write(dir.path().join("app/models/post.rb"), POST).unwrap();
        fs::write(dir.path().join("sig/post.rbs"), POST_SIGNATURE).unwrap();

        let mut config = Config::default();
        config.generation.parallelism = 2;
        let engine = Engine::with_config(config, dir.path().to_path_buf());
        (dir, engine)
    }

    fn output(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("sig/activesupport/app/models/post.rbs")
    }

    #[tokio::test]
    async fn test_generate_writes_signatures() {
        let (dir, engine) = project();

        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.parsed, 1);
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.written, 1);

        let content = fs::read_to_string(output(&dir)).unwrap();
        assert_eq!(
            content,
            "# resolve-type-names: false\n\
             \n\
             class Post < ::Object\n  \
               def size: () -> ::Integer\n  \
               def self.per_page: () -> untyped\n  \
               def self.per_page=: (untyped) -> untyped\n  \
               def per_page: () -> untyped\n  \
               def per_page=: (untyped) -> untyped\n\
             end\n"
        );
    }

    #[tokio::test]
    async fn test_unchanged_outputs_are_not_rewritten() {
        let (_dir, engine) = project();

        engine.generate(GenerateOptions::default()).await.unwrap();
        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.unchanged, 1);

        let summary = engine
            .generate(GenerateOptions { force: true, ..GenerateOptions::default() })
            .await
            .unwrap();
        assert_eq!(summary.written, 1);
    }

    #[tokio::test]
    async fn test_check_mode_reports_outdated_files() {
        let (dir, engine) = project();
        let check = GenerateOptions { check: true, ..GenerateOptions::default() };

        assert!(engine.generate(check.clone()).await.is_err());
        assert!(!output(&dir).exists());

        engine.generate(GenerateOptions::default()).await.unwrap();
        let summary = engine.generate(check.clone()).await.unwrap();
        assert!(summary.outdated.is_empty());

        fs::write(dir.path().join("app/models/post.rb"), POST.replace("per_page", "limit")).unwrap();
        assert!(engine.generate(check).await.is_err());
        assert!(fs::read_to_string(output(&dir)).unwrap().contains("per_page"));
    }

    #[tokio::test]
    async fn test_stale_outputs_are_removed() {
        let (dir, engine) = project();
        engine.generate(GenerateOptions::default()).await.unwrap();
        assert!(output(&dir).exists());

        fs::write(dir.path().join("app/models/post.rb"), "class Post\nend\n").unwrap();
        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(!output(&dir).exists());

        fs::write(dir.path().join("app/models/post.rb"), POST).unwrap();
        engine.generate(GenerateOptions::default()).await.unwrap();
        fs::remove_file(dir.path().join("app/models/post.rb")).unwrap();

        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(!output(&dir).exists());
    }

    #[tokio::test]
    async fn test_broken_files_do_not_stop_the_run() {
        let (dir, engine) = project();
        fs::write(dir.path().join("app/models/broken.rb"), "class Broken\n  delegate :x,\n").unwrap();

        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.parsed, 1);
        assert_eq!(summary.failed, 1);
        assert!(output(&dir).exists());
    }

    #[tokio::test]
    async fn test_failed_files_keep_their_previous_output() {
        let (dir, engine) = project();
        engine.generate(GenerateOptions::default()).await.unwrap();
        let before = fs::read_to_string(output(&dir)).unwrap();

        fs::write(dir.path().join("app/models/post.rb"), "class Post\n  delegate :size,\n").unwrap();
        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.removed, 0);
        assert_eq!(fs::read_to_string(output(&dir)).unwrap(), before);
    }

    #[tokio::test]
    async fn test_malformed_signature_files_are_skipped() {
        let (dir, engine) = project();
        fs::write(dir.path().join("sig/broken.rbs"), "class Broken\n  def x: () -> void\n").unwrap();
        fs::write(dir.path().join("sig/other.rbs"), "class Other end\n").unwrap();

        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.written, 1);
        assert!(fs::read_to_string(output(&dir)).unwrap().contains("def size: () -> ::Integer"));
    }

    #[tokio::test]
    async fn test_ignore_patterns_and_custom_sources() {
        let (dir, mut engine) = project();
        fs::create_dir_all(dir.path().join("app/vendor")).unwrap();
        fs::write(dir.path().join("app/vendor/lib.rb"), "class Lib\n  cattr_reader :x\nend\n").unwrap();

        engine.config.project.ignore_patterns = vec!["vendor/".to_string()];
        let summary = engine.generate(GenerateOptions::default()).await.unwrap();
        assert_eq!(summary.parsed, 1);

        let options = GenerateOptions {
            sources: vec![PathBuf::from("app/models")],
            output: Some(PathBuf::from("out")),
            ..GenerateOptions::default()
        };
        engine.generate(options).await.unwrap();
        assert!(dir.path().join("out/app/models/post.rbs").exists());
    }

    #[tokio::test]
    async fn test_show_and_inspect() {
        let (dir, engine) = project();
        let file = dir.path().join("app/models/post.rb");

        let shown = engine.show(&file).await.unwrap().unwrap();
        assert!(shown.contains("def size: () -> ::Integer"));

        let parsed = engine.inspect(&file).await.unwrap();
        assert_eq!(parsed.extraction.calls.call_count(), 2);
    }

    #[tokio::test]
    async fn test_show_sees_definitions_from_other_files() {
        let (dir, engine) = project();
        fs::create_dir_all(dir.path().join("app/models/concerns")).unwrap();
        fs::write(
            dir.path().join("app/models/concerns/taggable.rb"),
            "module Taggable\n  extend ActiveSupport::Concern\n\n  class_methods do\n    def tagged?\n      true\n    end\n  end\nend\n",
        )
        .unwrap();
        fs::write(dir.path().join("app/models/post.rb"), POST.replace("class Post\n", "class Post\n  include Taggable\n"))
            .unwrap();

        engine.generate(GenerateOptions::default()).await.unwrap();
        let generated = fs::read_to_string(output(&dir)).unwrap();

        let shown = engine.show(&dir.path().join("app/models/post.rb")).await.unwrap().unwrap();
        assert!(shown.contains("  include ::Taggable\n  extend ::Taggable::ClassMethods\n"));
        assert_eq!(shown, generated);
    }

    #[tokio::test]
    async fn test_init_writes_config_once() {
        let (dir, engine) = project();

        let path = engine.init(None, false).await.unwrap();
        assert_eq!(path, dir.path().join("RbsActivesupport.toml"));
        assert!(Config::load(&path).is_ok());

        assert!(engine.init(None, false).await.is_err());
        assert!(engine.init(None, true).await.is_ok());
    }
}
