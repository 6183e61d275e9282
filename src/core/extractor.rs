//! Macro call extraction from Ruby syntax trees
//!
//! Walks class and module bodies, recording every recognized macro call with
//! the namespace it occurs in and whether it sits in a private section. A
//! malformed call is logged and skipped; it never aborts the file.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use tree_sitter::{Node, Tree};

use super::macros::{
    AttributeOptions, CallTable, DelegateOptions, DelegatePrefix, Macro, MacroCall,
};
use super::Namespace;

/// Class or module as declared in source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefinitionKind {
    Class {
        /// Superclass as written, relative to the enclosing namespace
        superclass: Option<Namespace>,
    },
    Module,
}

/// A class/module definition seen while extracting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDefinition {
    pub name: Namespace,
    #[serde(flatten)]
    pub kind: DefinitionKind,

    /// Body contains `extend ActiveSupport::Concern`
    pub concern: bool,

    /// Body contains a `class_methods do ... end` block
    pub class_methods: bool,

    /// 1-based line of the first definition
    pub line: usize,
}

/// Everything extracted from one source unit
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub calls: CallTable,
    pub definitions: Vec<SourceDefinition>,
}

/// Arguments of a call split into positional values and `key: value` pairs
struct CallArguments<'t> {
    positional: Vec<Node<'t>>,
    options: Vec<(String, Node<'t>)>,
}

impl<'t> CallArguments<'t> {
    fn option(&self, key: &str) -> Option<Node<'t>> {
        self.options
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }
}

type Malformed = String;

pub struct MacroCallExtractor<'a> {
    source: &'a str,
    calls: CallTable,
    definitions: Vec<SourceDefinition>,
    definition_index: HashMap<Namespace, usize>,
}

impl<'a> MacroCallExtractor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            calls: CallTable::new(),
            definitions: Vec::new(),
            definition_index: HashMap::new(),
        }
    }

    /// Extract macro calls and definitions from a parsed tree of `source`
    pub fn extract(tree: &Tree, source: &'a str) -> Extraction {
        let mut extractor = Self::new(source);
        let mut private = false;
        extractor.walk_body(tree.root_node(), &Namespace::root(), &mut private);

        Extraction {
            calls: extractor.calls,
            definitions: extractor.definitions,
        }
    }

    fn walk_body(&mut self, node: Node, namespace: &Namespace, private: &mut bool) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();

        for child in children {
            self.visit_statement(child, namespace, private);
        }
    }

    fn visit_statement(&mut self, node: Node, namespace: &Namespace, private: &mut bool) {
        match node.kind() {
            "class" => self.visit_definition(node, namespace, true),
            "module" => self.visit_definition(node, namespace, false),
            "body_statement" => self.walk_body(node, namespace, private),
            "identifier" => match self.node_text(node) {
                "private" => *private = true,
                "public" | "protected" => *private = false,
                _ => {}
            },
            "call" | "method_call" => self.visit_call(node, namespace, *private),
            _ => {}
        }
    }

    /// `class Name < Super ... end` or `module Name ... end`
    fn visit_definition(&mut self, node: Node, outer: &Namespace, is_class: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(reference) = self.constant_path(name_node) else {
            debug!("Skipping definition with dynamic name at line {}", line_of(node));
            return;
        };
        let namespace = outer.join(&reference);

        let kind = if is_class {
            let superclass = node
                .child_by_field_name("superclass")
                .and_then(|superclass| superclass.named_child(0))
                .and_then(|expression| self.constant_path(expression));
            DefinitionKind::Class { superclass }
        } else {
            DefinitionKind::Module
        };
        self.record_definition(&namespace, kind, line_of(node));

        let mut private = false;
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.id() == name_node.id() || child.kind() == "superclass" {
                continue;
            }
            self.visit_statement(child, &namespace, &mut private);
        }
    }

    fn visit_call(&mut self, node: Node, namespace: &Namespace, private: bool) {
        if node.child_by_field_name("receiver").is_some() {
            return;
        }
        let Some(method_node) = node.child_by_field_name("method") else {
            return;
        };
        let method = self.node_text(method_node);
        let arguments = self.call_arguments(node);

        match method {
            "extend" => {
                let concern = arguments.positional.iter().any(|arg| {
                    self.constant_path(*arg)
                        .map_or(false, |path| path.path() == ["ActiveSupport", "Concern"])
                });
                if concern {
                    self.update_definition(namespace, |definition| definition.concern = true);
                }
            }
            "class_methods" => {
                if node.child_by_field_name("block").is_some() {
                    self.update_definition(namespace, |definition| definition.class_methods = true);
                }
            }
            _ if Macro::is_macro_name(method) => {
                if namespace.is_empty() {
                    debug!("Ignoring top-level `{}` at line {}", method, line_of(node));
                    return;
                }

                match self.parse_macro(method, &arguments) {
                    Ok(macro_def) => {
                        let private = private
                            || matches!(&macro_def, Macro::Delegate { options, .. } if options.private);
                        self.calls
                            .push(namespace, MacroCall::new(macro_def, private, line_of(node)));
                    }
                    Err(reason) => {
                        debug!(
                            "Skipping malformed `{}` call at line {}: {}",
                            method,
                            line_of(node),
                            reason
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn parse_macro(&self, method: &str, arguments: &CallArguments) -> Result<Macro, Malformed> {
        if let Some((style, kind)) = Macro::accessor_for(method) {
            return Ok(Macro::ClassAccessor {
                style,
                kind,
                names: self.literal_names(arguments)?,
                options: self.attribute_options(arguments)?,
            });
        }

        match method {
            "delegate" => Ok(Macro::Delegate {
                methods: self.literal_names(arguments)?,
                options: self.delegate_options(arguments)?,
            }),
            "class_attribute" => Ok(Macro::ClassAttribute {
                names: self.literal_names(arguments)?,
                options: self.attribute_options(arguments)?,
            }),
            "include" => {
                if arguments.positional.is_empty() {
                    return Err("no modules given".to_string());
                }
                let modules = arguments
                    .positional
                    .iter()
                    .map(|arg| {
                        self.constant_path(*arg).ok_or_else(|| {
                            format!("expected a constant, found `{}`", self.node_text(*arg))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Macro::Include { modules })
            }
            _ => Err(format!("`{}` is not a recognized macro", method)),
        }
    }

    fn delegate_options(&self, arguments: &CallArguments) -> Result<DelegateOptions, Malformed> {
        let to = arguments
            .option("to")
            .ok_or_else(|| "missing `to:` option".to_string())?;
        let to = self.literal_name(to)?;

        let prefix = match arguments.option("prefix") {
            None => None,
            Some(value) => match value.kind() {
                "true" => {
                    let plain = to
                        .chars()
                        .next()
                        .map_or(false, |c| c.is_ascii_lowercase() || c == '_');
                    if !plain {
                        return Err(format!("`prefix: true` cannot be used with target `{}`", to));
                    }
                    Some(DelegatePrefix::Target)
                }
                "false" | "nil" => None,
                _ => Some(DelegatePrefix::Custom(self.literal_name(value)?)),
            },
        };

        Ok(DelegateOptions {
            to,
            prefix,
            allow_nil: self.flag(arguments, "allow_nil", false)?,
            private: self.flag(arguments, "private", false)?,
        })
    }

    fn attribute_options(&self, arguments: &CallArguments) -> Result<AttributeOptions, Malformed> {
        let mut flags = HashMap::new();
        for key in AttributeOptions::FLAGS {
            if arguments.option(key).is_some() {
                flags.insert(key.to_string(), self.flag(arguments, key, true)?);
            }
        }
        Ok(AttributeOptions::from_flags(&flags))
    }

    /// Literal boolean option; `nil` reads as false
    fn flag(&self, arguments: &CallArguments, key: &str, default: bool) -> Result<bool, Malformed> {
        match arguments.option(key) {
            None => Ok(default),
            Some(value) => match value.kind() {
                "true" => Ok(true),
                "false" | "nil" => Ok(false),
                _ => Err(format!(
                    "`{}:` expects a literal boolean, found `{}`",
                    key,
                    self.node_text(value)
                )),
            },
        }
    }

    fn literal_names(&self, arguments: &CallArguments) -> Result<Vec<String>, Malformed> {
        if arguments.positional.is_empty() {
            return Err("no names given".to_string());
        }
        arguments
            .positional
            .iter()
            .map(|arg| self.literal_name(*arg))
            .collect()
    }

    /// `:name`, `:"name"` or `"name"`
    fn literal_name(&self, node: Node) -> Result<String, Malformed> {
        let name = match node.kind() {
            "simple_symbol" => self.node_text(node).trim_start_matches(':').to_string(),
            "delimited_symbol" | "string" => self.string_content(node)?,
            kind => {
                return Err(format!(
                    "expected a symbol or string, found {} `{}`",
                    kind,
                    self.node_text(node)
                ))
            }
        };

        if name.is_empty() {
            return Err("empty name".to_string());
        }
        Ok(name)
    }

    fn string_content(&self, node: Node) -> Result<String, Malformed> {
        let mut content = String::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "string_content" => content.push_str(self.node_text(child)),
                "interpolation" => return Err("interpolated names are not supported".to_string()),
                kind => return Err(format!("unsupported {} in name", kind)),
            }
        }
        Ok(content)
    }

    fn call_arguments<'t>(&self, node: Node<'t>) -> CallArguments<'t> {
        let mut arguments = CallArguments {
            positional: Vec::new(),
            options: Vec::new(),
        };

        let Some(list) = node.child_by_field_name("arguments") else {
            return arguments;
        };

        let mut cursor = list.walk();
        for child in list.named_children(&mut cursor) {
            match child.kind() {
                "pair" => self.push_pair(child, &mut arguments),
                "hash" => {
                    let mut hash_cursor = child.walk();
                    for pair in child.named_children(&mut hash_cursor) {
                        if pair.kind() == "pair" {
                            self.push_pair(pair, &mut arguments);
                        }
                    }
                }
                "comment" => {}
                _ => arguments.positional.push(child),
            }
        }

        arguments
    }

    fn push_pair<'t>(&self, pair: Node<'t>, arguments: &mut CallArguments<'t>) {
        let (Some(key), Some(value)) = (
            pair.child_by_field_name("key"),
            pair.child_by_field_name("value"),
        ) else {
            return;
        };

        let key = match key.kind() {
            "hash_key_symbol" => Some(self.node_text(key).to_string()),
            "simple_symbol" => Some(self.node_text(key).trim_start_matches(':').to_string()),
            "string" | "delimited_symbol" => self.string_content(key).ok(),
            _ => None,
        };

        if let Some(key) = key {
            arguments.options.push((key.trim_end_matches(':').to_string(), value));
        }
    }

    /// `Foo`, `Foo::Bar` or `::Foo`
    fn constant_path(&self, node: Node) -> Option<Namespace> {
        match node.kind() {
            "constant" => Some(Namespace::new(vec![self.node_text(node).to_string()], false)),
            "scope_resolution" => {
                let name = node.child_by_field_name("name")?;
                if name.kind() != "constant" {
                    return None;
                }
                let name = self.node_text(name);

                match node.child_by_field_name("scope") {
                    Some(scope) => Some(self.constant_path(scope)?.append(name)),
                    None => Some(Namespace::new(vec![name.to_string()], true)),
                }
            }
            _ => None,
        }
    }

    fn record_definition(&mut self, namespace: &Namespace, kind: DefinitionKind, line: usize) {
        if let Some(&position) = self.definition_index.get(namespace) {
            let existing = &mut self.definitions[position];
            if let (
                DefinitionKind::Class { superclass: existing_superclass },
                DefinitionKind::Class { superclass },
            ) = (&mut existing.kind, &kind)
            {
                if existing_superclass.is_none() {
                    *existing_superclass = superclass.clone();
                }
            }
            return;
        }

        self.definition_index
            .insert(namespace.clone(), self.definitions.len());
        self.definitions.push(SourceDefinition {
            name: namespace.clone(),
            kind,
            concern: false,
            class_methods: false,
            line,
        });
    }

    fn update_definition(&mut self, namespace: &Namespace, update: impl FnOnce(&mut SourceDefinition)) {
        if let Some(&position) = self.definition_index.get(namespace) {
            update(&mut self.definitions[position]);
        }
    }

    /// Extract text content of a node
    fn node_text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }
}

fn line_of(node: Node) -> usize {
    node.start_position().row + 1
}
