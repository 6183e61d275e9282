use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use super::declaration::DeclarationBuilder;
use super::env::Environment;
use super::formatter::{DeclarationBlock, NamespaceFormatter};
use super::parser::ParsedFile;

/// Outcome of generating one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutput {
    Signatures(String),
    /// No macro call defines a method
    Empty,
    /// Generation failed and was logged
    Failed,
}

/// Turns the extracted macro calls of one file into an RBS document
pub struct Generator {
    env: Arc<Environment>,
    formatter: NamespaceFormatter,
}

impl Generator {
    pub fn new(env: Arc<Environment>) -> Result<Self> {
        Ok(Self {
            env,
            formatter: NamespaceFormatter::new()?,
        })
    }

    /// Declarations for every namespace of `file` that defines methods
    pub fn declarations(&self, file: &ParsedFile) -> Vec<DeclarationBlock> {
        let builder = DeclarationBuilder::new(self.env.as_ref());

        file.extraction
            .calls
            .iter()
            .map(|(namespace, calls)| {
                let (public, private) = builder.build(namespace, calls);
                DeclarationBlock {
                    namespace: namespace.clone(),
                    public,
                    private,
                }
            })
            .filter(|block| !block.is_empty())
            .collect()
    }

    /// RBS text for `file`, or `None` when no macro call defines a method
    pub fn generate(&self, file: &ParsedFile) -> Result<Option<String>> {
        let blocks = self.declarations(file);
        if blocks.is_empty() {
            debug!("No declarations for {}", file.path.display());
            return Ok(None);
        }

        let output = self
            .formatter
            .format(self.env.as_ref(), &blocks, &file.extraction.definitions)?;
        Ok(Some(output))
    }

    /// Like [`Generator::generate`], logging failures instead of returning them
    pub fn generate_or_warn(&self, file: &ParsedFile) -> UnitOutput {
        match self.generate(file) {
            Ok(Some(output)) => UnitOutput::Signatures(output),
            Ok(None) => UnitOutput::Empty,
            Err(e) => {
                warn!("Failed to generate declarations for {}: {}", file.path.display(), e);
                UnitOutput::Failed
            }
        }
    }
}
