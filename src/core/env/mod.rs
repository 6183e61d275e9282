//! Type environment: the read-only database of known classes, modules and
//! method signatures consulted while synthesizing declarations.
//!
//! Resolvers only see the [`TypeEnvironment`] trait. [`Environment`] is the
//! in-memory implementation built by [`EnvironmentLoader`] from RBS files and
//! the definitions found in the parsed Ruby sources.

mod signature;
pub mod type_expr;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{GeneratorError, Result};
use super::extractor::{DefinitionKind, SourceDefinition};
use super::namespace::lookup_constant;
use super::Namespace;

pub use signature::parse_signature;

/// Core library signatures shipped with the binary
const CORE_SIGNATURES: &str = include_str!("core.rbs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Instance,
    Singleton,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    /// Return type of each overload, in declaration order
    pub return_types: Vec<String>,
}

impl MethodDecl {
    /// Return type of the first overload
    pub fn return_type(&self) -> Option<&str> {
        self.return_types.first().map(|ty| ty.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    Class { superclass: Option<Namespace> },
    Module,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: Namespace,
    pub kind: DeclKind,
    /// Extends `ActiveSupport::Concern`
    pub concern: bool,
    pub includes: Vec<Namespace>,
    pub extends: Vec<Namespace>,
    pub instance_methods: HashMap<String, MethodDecl>,
    pub singleton_methods: HashMap<String, MethodDecl>,
}

impl TypeDecl {
    pub fn new(name: Namespace, kind: DeclKind) -> Self {
        Self {
            name,
            kind,
            concern: false,
            includes: Vec::new(),
            extends: Vec::new(),
            instance_methods: HashMap::new(),
            singleton_methods: HashMap::new(),
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, DeclKind::Class { .. })
    }

    pub fn methods(&self, kind: MethodKind) -> &HashMap<String, MethodDecl> {
        match kind {
            MethodKind::Instance => &self.instance_methods,
            MethodKind::Singleton => &self.singleton_methods,
        }
    }

    /// Superclass with the implicit `::Object` default; `::BasicObject` has none
    pub fn effective_superclass(&self) -> Option<Namespace> {
        match &self.kind {
            DeclKind::Class { superclass: Some(superclass) } => Some(superclass.clone()),
            DeclKind::Class { superclass: None } if self.name.path() != ["BasicObject"] => {
                Namespace::parse("::Object")
            }
            _ => None,
        }
    }

    /// Fold a reopened declaration of the same type into this one
    fn merge(&mut self, other: TypeDecl) {
        if let (DeclKind::Class { superclass }, DeclKind::Class { superclass: other_superclass }) =
            (&mut self.kind, other.kind)
        {
            if superclass.is_none() {
                *superclass = other_superclass;
            }
        }
        self.concern |= other.concern;
        self.includes.extend(other.includes);
        self.extends.extend(other.extends);
        self.instance_methods.extend(other.instance_methods);
        self.singleton_methods.extend(other.singleton_methods);
    }
}

/// Read-only lookups the declaration pipeline needs from a type database
pub trait TypeEnvironment: Send + Sync {
    /// Declaration of an absolute type name
    fn declaration(&self, name: &Namespace) -> Option<&TypeDecl>;

    /// Method on `owner`, including inherited and mixed-in methods
    fn find_method(&self, owner: &Namespace, method: &str, kind: MethodKind) -> Option<&MethodDecl>;

    fn type_exists(&self, name: &Namespace) -> bool {
        self.declaration(name).is_some()
    }

    fn is_concern(&self, name: &Namespace) -> bool {
        self.declaration(name).map_or(false, |decl| decl.concern)
    }

    /// Resolve a constant reference the way Ruby does, innermost namespace first
    fn resolve_constant(&self, context: &Namespace, reference: &Namespace) -> Option<Namespace> {
        lookup_constant(context, reference, |candidate| self.type_exists(candidate))
    }
}

#[derive(Debug, Default)]
pub struct Environment {
    declarations: HashMap<Namespace, TypeDecl>,
}

impl Environment {
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    fn search_method<'e>(
        &'e self,
        owner: &Namespace,
        method: &str,
        kind: MethodKind,
        visited: &mut HashSet<(Namespace, MethodKind)>,
    ) -> Option<&'e MethodDecl> {
        if !visited.insert((owner.clone(), kind)) {
            return None;
        }
        let decl = self.declarations.get(owner)?;

        if let Some(found) = decl.methods(kind).get(method) {
            return Some(found);
        }

        let mixins = match kind {
            MethodKind::Instance => &decl.includes,
            MethodKind::Singleton => &decl.extends,
        };
        for mixin in mixins.iter().rev() {
            if let Some(found) = self.search_method(mixin, method, MethodKind::Instance, visited) {
                return Some(found);
            }
        }

        if let Some(superclass) = decl.effective_superclass() {
            if let Some(found) = self.search_method(&superclass, method, kind, visited) {
                return Some(found);
            }
        }

        if kind == MethodKind::Singleton {
            let metaclass = if decl.is_class() { "::Class" } else { "::Module" };
            let metaclass = Namespace::parse(metaclass)?;
            return self.search_method(&metaclass, method, MethodKind::Instance, visited);
        }

        None
    }
}

impl TypeEnvironment for Environment {
    fn declaration(&self, name: &Namespace) -> Option<&TypeDecl> {
        self.declarations.get(name)
    }

    fn find_method(&self, owner: &Namespace, method: &str, kind: MethodKind) -> Option<&MethodDecl> {
        let mut visited = HashSet::new();
        self.search_method(owner, method, kind, &mut visited)
    }
}

/// Collects declarations from signatures and sources, then resolves names
#[derive(Debug, Default)]
pub struct EnvironmentLoader {
    declarations: HashMap<Namespace, TypeDecl>,
    order: Vec<Namespace>,
}

impl EnvironmentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the bundled core library signatures
    pub fn with_core(mut self) -> Result<Self> {
        self.add_signature(CORE_SIGNATURES, Path::new("<core>"))?;
        Ok(self)
    }

    /// Add every declaration of one RBS file
    pub fn add_signature(&mut self, content: &str, path: &Path) -> Result<()> {
        for decl in parse_signature(content, path)? {
            self.insert(decl);
        }
        Ok(())
    }

    /// Load all `*.rbs` files below `dir`, skipping anything under `exclude`
    ///
    /// Unreadable or malformed files are logged and left out.
    pub fn add_signature_dir(&mut self, dir: &Path, exclude: Option<&Path>) -> Result<usize> {
        let mut loaded = 0;
        if !dir.is_dir() {
            debug!("Signature directory {} does not exist", dir.display());
            return Ok(loaded);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_entry(|entry| exclude.map_or(true, |excluded| !entry.path().starts_with(excluded)))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("rbs"))
            .collect();
        files.sort();

        for path in files {
            let result = std::fs::read_to_string(&path)
                .map_err(GeneratorError::Io)
                .and_then(|content| self.add_signature(&content, &path));
            match result {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping signature file {}: {}", path.display(), e),
            }
        }

        Ok(loaded)
    }

    /// Register classes and modules seen in Ruby sources
    ///
    /// Signature declarations win; sources only fill in what is missing.
    pub fn add_source_definitions<'d>(&mut self, definitions: impl IntoIterator<Item = &'d SourceDefinition>) {
        for definition in definitions {
            let kind = match &definition.kind {
                DefinitionKind::Class { superclass } => DeclKind::Class {
                    superclass: superclass.clone(),
                },
                DefinitionKind::Module => DeclKind::Module,
            };

            match self.declarations.get_mut(&definition.name) {
                Some(existing) => {
                    existing.concern |= definition.concern;
                    if let (DeclKind::Class { superclass }, DeclKind::Class { superclass: written }) =
                        (&mut existing.kind, kind)
                    {
                        if superclass.is_none() {
                            *superclass = written;
                        }
                    }
                }
                None => {
                    let mut decl = TypeDecl::new(definition.name.clone(), kind);
                    decl.concern = definition.concern;
                    self.insert(decl);
                }
            }

            if definition.class_methods {
                let class_methods = definition.name.append("ClassMethods");
                if !self.declarations.contains_key(&class_methods) {
                    self.insert(TypeDecl::new(class_methods, DeclKind::Module));
                }
            }
        }
    }

    fn insert(&mut self, decl: TypeDecl) {
        match self.declarations.get_mut(&decl.name) {
            Some(existing) => existing.merge(decl),
            None => {
                self.order.push(decl.name.clone());
                self.declarations.insert(decl.name.clone(), decl);
            }
        }
    }

    /// Resolve every relative name against the loaded declarations
    pub fn build(self) -> Environment {
        let known: HashSet<Namespace> = self.declarations.keys().cloned().collect();
        let exists = |candidate: &Namespace| known.contains(candidate);
        let mut declarations = self.declarations;

        for name in &self.order {
            let Some(decl) = declarations.get_mut(name) else {
                continue;
            };
            let outer = name.parent();

            if let DeclKind::Class { superclass: Some(superclass) } = &mut decl.kind {
                if let Some(resolved) = lookup_constant(&outer, superclass, exists) {
                    *superclass = resolved;
                }
            }

            for mixin in decl.includes.iter_mut().chain(decl.extends.iter_mut()) {
                if let Some(resolved) = lookup_constant(name, mixin, exists) {
                    *mixin = resolved;
                }
            }
            decl.concern |= decl
                .extends
                .iter()
                .any(|extended| extended.path() == ["ActiveSupport", "Concern"]);

            for method in decl
                .instance_methods
                .values_mut()
                .chain(decl.singleton_methods.values_mut())
            {
                for ty in &mut method.return_types {
                    *ty = type_expr::absolutize(ty, |reference| lookup_constant(name, reference, exists));
                }
            }
        }

        debug!("Type environment ready with {} declarations", declarations.len());
        Environment { declarations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(text: &str) -> Namespace {
        Namespace::parse(text).unwrap()
    }

    fn environment(signature: &str) -> Environment {
        let mut loader = EnvironmentLoader::new().with_core().unwrap();
        loader.add_signature(signature, Path::new("test.rbs")).unwrap();
        loader.build()
    }

    #[test]
    fn test_method_lookup_follows_superclass_and_mixins() {
        let env = environment(
            r#"
module Named
  def name: () -> String
end

class Base
  include Named
  def id: () -> Integer
end

class Post < Base
  def title: () -> String
end
"#,
        );

        let post = ns("::Post");
        let title = env.find_method(&post, "title", MethodKind::Instance).unwrap();
        assert_eq!(title.return_type(), Some("::String"));

        let id = env.find_method(&post, "id", MethodKind::Instance).unwrap();
        assert_eq!(id.return_type(), Some("::Integer"));

        let name = env.find_method(&post, "name", MethodKind::Instance).unwrap();
        assert_eq!(name.return_type(), Some("::String"));

        let to_s = env.find_method(&post, "to_s", MethodKind::Instance).unwrap();
        assert_eq!(to_s.return_type(), Some("::String"));

        assert!(env.find_method(&post, "missing", MethodKind::Instance).is_none());
        assert!(env.find_method(&ns("::Nope"), "to_s", MethodKind::Instance).is_none());
    }

    #[test]
    fn test_singleton_lookup_uses_extends() {
        let env = environment(
            r#"
module Finders
  def find: (Integer) -> Post
end

class Post
  extend Finders
  def self.table_name: () -> String
end
"#,
        );

        let post = ns("::Post");
        let find = env.find_method(&post, "find", MethodKind::Singleton).unwrap();
        assert_eq!(find.return_type(), Some("::Post"));
        assert!(env.find_method(&post, "table_name", MethodKind::Singleton).is_some());
        assert!(env.find_method(&post, "table_name", MethodKind::Instance).is_none());
    }

    #[test]
    fn test_names_resolve_from_the_declaring_namespace() {
        let env = environment(
            r#"
module Shop
  class Item
  end

  class Order
    def item: () -> Item
    def items: () -> Array[Item]
  end
end
"#,
        );

        let order = ns("::Shop::Order");
        let item = env.find_method(&order, "item", MethodKind::Instance).unwrap();
        assert_eq!(item.return_type(), Some("::Shop::Item"));

        let items = env.find_method(&order, "items", MethodKind::Instance).unwrap();
        assert_eq!(items.return_type(), Some("::Array[::Shop::Item]"));
    }

    #[test]
    fn test_concern_marker_and_source_definitions() {
        let mut loader = EnvironmentLoader::new().with_core().unwrap();
        loader
            .add_signature(
                "module Taggable\n  extend ActiveSupport::Concern\nend\n",
                Path::new("taggable.rbs"),
            )
            .unwrap();

        let definitions = vec![
            SourceDefinition {
                name: ns("::Trackable"),
                kind: DefinitionKind::Module,
                concern: true,
                class_methods: true,
                line: 1,
            },
            SourceDefinition {
                name: ns("::Post"),
                kind: DefinitionKind::Class { superclass: Some(ns("Record")) },
                concern: false,
                class_methods: false,
                line: 1,
            },
            SourceDefinition {
                name: ns("::Record"),
                kind: DefinitionKind::Class { superclass: None },
                concern: false,
                class_methods: false,
                line: 1,
            },
        ];
        loader.add_source_definitions(&definitions);
        let env = loader.build();

        assert!(env.is_concern(&ns("::Taggable")));
        assert!(env.is_concern(&ns("::Trackable")));
        assert!(env.type_exists(&ns("::Trackable::ClassMethods")));
        assert!(!env.is_concern(&ns("::Post")));

        let post = env.declaration(&ns("::Post")).unwrap();
        assert_eq!(post.effective_superclass(), Some(ns("::Record")));
    }

    #[test]
    fn test_signature_dir_skips_excluded_output() {
        let dir = tempfile::tempdir().unwrap();
        let sig = dir.path().join("sig");
        let generated = sig.join("activesupport");
        std::fs::create_dir_all(&generated).unwrap();
        std::fs::write(sig.join("user.rbs"), "class User\nend\n").unwrap();
        std::fs::write(generated.join("user.rbs"), "class Generated\nend\n").unwrap();

        let mut loader = EnvironmentLoader::new();
        let loaded = loader.add_signature_dir(&sig, Some(&generated)).unwrap();
        assert_eq!(loaded, 1);

        let env = loader.build();
        assert!(env.type_exists(&ns("::User")));
        assert!(!env.type_exists(&ns("::Generated")));
    }

    #[test]
    fn test_signature_dir_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.rbs"), "class Broken\n  def x: () -> void\n").unwrap();
        std::fs::write(dir.path().join("user.rbs"), "class User\nend\n").unwrap();

        let mut loader = EnvironmentLoader::new();
        let loaded = loader.add_signature_dir(dir.path(), None).unwrap();
        assert_eq!(loaded, 1);

        let env = loader.build();
        assert!(env.type_exists(&ns("::User")));
        assert!(!env.type_exists(&ns("::Broken")));
    }
}
