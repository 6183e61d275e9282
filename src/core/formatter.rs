//! Rendering of per-namespace declarations into an RBS file

use serde::Serialize;
use tera::{Context, Tera};
use tracing::debug;

use crate::error::{GeneratorError, Result};
use super::env::{DeclKind, TypeEnvironment};
use super::extractor::{DefinitionKind, SourceDefinition};
use super::Namespace;

/// Directive every generated file starts with
pub const HEADER: &str = "# resolve-type-names: false";

const TEMPLATE_NAME: &str = "declarations.rbs";

const TEMPLATE: &str = r#"{% for block in blocks %}
{% for header in block.headers %}{{ header }}
{% endfor %}{% for decl in block.public %}{{ decl }}
{% endfor %}{% if block.private | length > 0 %}private
{% for decl in block.private %}{{ decl }}
{% endfor %}{% endif %}{% for header in block.headers %}end
{% endfor %}{% endfor %}"#;

/// Signatures synthesized for one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationBlock {
    pub namespace: Namespace,
    pub public: Vec<String>,
    pub private: Vec<String>,
}

impl DeclarationBlock {
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.private.is_empty()
    }
}

#[derive(Serialize)]
struct RenderedBlock<'b> {
    headers: Vec<String>,
    public: &'b [String],
    private: &'b [String],
}

/// Wraps declaration blocks in their class/module headers
pub struct NamespaceFormatter {
    tera: Tera,
}

impl NamespaceFormatter {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, TEMPLATE)?;
        Ok(Self { tera })
    }

    /// Render `blocks` in order as one normalized RBS document
    ///
    /// Headers come from the type environment first, then from the
    /// definitions of the file itself; unknown segments become modules.
    pub fn format(
        &self,
        env: &dyn TypeEnvironment,
        blocks: &[DeclarationBlock],
        definitions: &[SourceDefinition],
    ) -> Result<String> {
        let mut rendered = Vec::new();
        for block in blocks.iter().filter(|block| !block.is_empty()) {
            if block.namespace.is_empty() {
                return Err(GeneratorError::Generation(
                    "methods cannot be declared on the top-level namespace".to_string(),
                ));
            }

            let headers = block
                .namespace
                .prefixes()
                .map(|prefix| header_line(env, &prefix, definitions))
                .collect();

            rendered.push(RenderedBlock {
                headers,
                public: &block.public,
                private: &block.private,
            });
        }

        let mut context = Context::new();
        context.insert("blocks", &rendered);
        let raw = self.tera.render(TEMPLATE_NAME, &context)?;

        Ok(SignatureWriter::new().write(&raw))
    }
}

/// Open line for one namespace segment
fn header_line(env: &dyn TypeEnvironment, prefix: &Namespace, definitions: &[SourceDefinition]) -> String {
    let name = prefix.name().unwrap_or_default();

    if let Some(decl) = env.declaration(prefix) {
        return match decl.kind {
            DeclKind::Class { .. } => {
                let superclass = decl
                    .effective_superclass()
                    .map(|superclass| known_superclass(prefix, superclass));
                class_line(name, superclass)
            }
            DeclKind::Module => format!("module {}", name),
        };
    }

    let definition = definitions.iter().find(|definition| &definition.name == prefix);
    match definition.map(|definition| &definition.kind) {
        Some(DefinitionKind::Class { superclass }) => {
            let superclass = match superclass {
                Some(written) => {
                    let resolved = env.resolve_constant(&prefix.parent(), written);
                    known_superclass(prefix, resolved.unwrap_or_else(|| written.clone()))
                }
                None => object(),
            };
            class_line(name, Some(superclass))
        }
        _ => format!("module {}", name),
    }
}

/// Superclasses that did not resolve to an absolute name become `::Object`
fn known_superclass(class: &Namespace, superclass: Namespace) -> Namespace {
    if superclass.is_absolute() {
        return superclass;
    }
    debug!("Superclass {} of {} is unknown, using ::Object", superclass, class);
    object()
}

fn object() -> Namespace {
    Namespace::root().append("Object")
}

fn class_line(name: &str, superclass: Option<Namespace>) -> String {
    match superclass {
        Some(superclass) => format!("class {} < {}", name, superclass),
        None => format!("class {}", name),
    }
}

/// Normalizes rendered declarations
///
/// Indents two spaces per nesting level, drops blank lines from the input
/// and puts single blank lines around `private` and between top-level
/// declarations.
#[derive(Debug, Default)]
pub struct SignatureWriter {
    lines: Vec<String>,
    depth: usize,
}

impl SignatureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, raw: &str) -> String {
        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            self.push(line);
        }
        self.finish_lines();

        let mut output = String::from(HEADER);
        output.push_str("\n\n");
        for line in &self.lines {
            output.push_str(line);
            output.push('\n');
        }
        output
    }

    fn push(&mut self, line: &str) {
        if line == "end" {
            self.depth = self.depth.saturating_sub(1);
            self.emit(line);
            if self.depth == 0 {
                self.blank();
            }
            return;
        }

        if line == "private" {
            if !self.last_opens() {
                self.blank();
            }
            self.emit(line);
            self.blank();
            return;
        }

        self.emit(line);
        if is_opening(line) {
            self.depth += 1;
        }
    }

    fn emit(&mut self, line: &str) {
        // no blank line right before a closing `end`
        if line == "end" && self.lines.last().map_or(false, |last| last.is_empty()) {
            self.lines.pop();
        }
        self.lines.push(format!("{}{}", "  ".repeat(self.depth), line));
    }

    fn blank(&mut self) {
        if self.lines.last().map_or(false, |last| !last.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn last_opens(&self) -> bool {
        self.lines.last().map_or(true, |last| is_opening(last.trim_start()))
    }

    /// Drop the trailing blank line left by the last top-level `end`
    fn finish_lines(&mut self) {
        while self.lines.last().map_or(false, |last| last.is_empty()) {
            self.lines.pop();
        }
    }
}

fn is_opening(line: &str) -> bool {
    line.starts_with("class ") || line.starts_with("module ")
}
