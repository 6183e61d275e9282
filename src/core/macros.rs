//! Recognized ActiveSupport macro calls
//!
//! Each macro the generator understands is one variant of [`Macro`], carrying
//! its already-parsed arguments. Options are resolved to flat records with
//! their defaults applied when the call is extracted.

use std::collections::HashMap;

use serde::Serialize;

use super::Namespace;

/// Naming variant of the class/module-wide accessor definers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorStyle {
    /// `cattr_*`
    Cattr,
    /// `mattr_*`
    Mattr,
}

/// Which half of an attribute the definer creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorKind {
    Reader,
    Writer,
    Accessor,
}

impl AccessorKind {
    pub fn defines_reader(self) -> bool {
        matches!(self, AccessorKind::Reader | AccessorKind::Accessor)
    }

    pub fn defines_writer(self) -> bool {
        matches!(self, AccessorKind::Writer | AccessorKind::Accessor)
    }
}

/// `prefix:` option of `delegate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegatePrefix {
    /// `prefix: true`, prefix with the target name
    Target,
    /// `prefix: :custom`
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegateOptions {
    /// Accessor the methods are forwarded to (`to:`)
    pub to: String,
    pub prefix: Option<DelegatePrefix>,
    pub allow_nil: bool,
    pub private: bool,
}

impl DelegateOptions {
    /// Name the forwarded `method` gets on the delegating class
    pub fn method_name(&self, method: &str) -> String {
        match &self.prefix {
            Some(DelegatePrefix::Target) => format!("{}_{}", self.to, method),
            Some(DelegatePrefix::Custom(prefix)) => format!("{}_{}", prefix, method),
            None => method.to_string(),
        }
    }
}

/// Flags shared by `class_attribute` and the `cattr_*`/`mattr_*` definers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttributeOptions {
    pub instance_accessor: bool,
    pub instance_reader: bool,
    pub instance_writer: bool,
    pub instance_predicate: bool,
}

impl Default for AttributeOptions {
    fn default() -> Self {
        Self {
            instance_accessor: true,
            instance_reader: true,
            instance_writer: true,
            instance_predicate: true,
        }
    }
}

impl AttributeOptions {
    pub const FLAGS: [&'static str; 4] = [
        "instance_accessor",
        "instance_reader",
        "instance_writer",
        "instance_predicate",
    ];

    /// Apply literal flag values; unknown keys are ignored
    pub fn from_flags(flags: &HashMap<String, bool>) -> Self {
        let mut options = Self::default();
        for (key, value) in flags {
            match key.as_str() {
                "instance_accessor" => options.instance_accessor = *value,
                "instance_reader" => options.instance_reader = *value,
                "instance_writer" => options.instance_writer = *value,
                "instance_predicate" => options.instance_predicate = *value,
                _ => {}
            }
        }
        options
    }

    pub fn instance_reader(&self) -> bool {
        self.instance_accessor && self.instance_reader
    }

    pub fn instance_writer(&self) -> bool {
        self.instance_accessor && self.instance_writer
    }
}

/// A recognized macro with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "macro", rename_all = "snake_case")]
pub enum Macro {
    /// `delegate :a, :b, to: :target`
    Delegate {
        methods: Vec<String>,
        options: DelegateOptions,
    },
    /// `class_attribute :a, :b`
    ClassAttribute {
        names: Vec<String>,
        options: AttributeOptions,
    },
    /// `cattr_reader`, `mattr_writer`, `cattr_accessor`, ...
    ClassAccessor {
        style: AccessorStyle,
        kind: AccessorKind,
        names: Vec<String>,
        options: AttributeOptions,
    },
    /// `include A, B`
    Include { modules: Vec<Namespace> },
}

impl Macro {
    /// Macro method name as written in Ruby
    pub fn method_name(&self) -> &'static str {
        match self {
            Macro::Delegate { .. } => "delegate",
            Macro::ClassAttribute { .. } => "class_attribute",
            Macro::ClassAccessor { style, kind, .. } => match (style, kind) {
                (AccessorStyle::Cattr, AccessorKind::Reader) => "cattr_reader",
                (AccessorStyle::Cattr, AccessorKind::Writer) => "cattr_writer",
                (AccessorStyle::Cattr, AccessorKind::Accessor) => "cattr_accessor",
                (AccessorStyle::Mattr, AccessorKind::Reader) => "mattr_reader",
                (AccessorStyle::Mattr, AccessorKind::Writer) => "mattr_writer",
                (AccessorStyle::Mattr, AccessorKind::Accessor) => "mattr_accessor",
            },
            Macro::Include { .. } => "include",
        }
    }

    /// Accessor style and kind for a `cattr_*`/`mattr_*` method name
    pub fn accessor_for(method: &str) -> Option<(AccessorStyle, AccessorKind)> {
        let (style, kind) = method.split_once('_')?;
        let style = match style {
            "cattr" => AccessorStyle::Cattr,
            "mattr" => AccessorStyle::Mattr,
            _ => return None,
        };
        let kind = match kind {
            "reader" => AccessorKind::Reader,
            "writer" => AccessorKind::Writer,
            "accessor" => AccessorKind::Accessor,
            _ => return None,
        };
        Some((style, kind))
    }

    /// Whether `method` names one of the recognized macros
    pub fn is_macro_name(method: &str) -> bool {
        matches!(method, "delegate" | "class_attribute" | "include")
            || Self::accessor_for(method).is_some()
    }
}

/// One extracted macro invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacroCall {
    #[serde(flatten)]
    pub macro_def: Macro,

    /// Declared in a private section or with `private: true`
    pub private: bool,

    /// 1-based source line
    pub line: usize,
}

impl MacroCall {
    pub fn new(macro_def: Macro, private: bool, line: usize) -> Self {
        Self {
            macro_def,
            private,
            line,
        }
    }
}

/// Macro calls grouped by the namespace they occur in
///
/// Namespaces keep the order in which they were first seen; reopening a
/// class later in the file appends to its existing entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallTable {
    entries: Vec<(Namespace, Vec<MacroCall>)>,
    #[serde(skip)]
    index: HashMap<Namespace, usize>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, namespace: &Namespace, call: MacroCall) {
        match self.index.get(namespace) {
            Some(&position) => self.entries[position].1.push(call),
            None => {
                self.index.insert(namespace.clone(), self.entries.len());
                self.entries.push((namespace.clone(), vec![call]));
            }
        }
    }

    pub fn get(&self, namespace: &Namespace) -> Option<&[MacroCall]> {
        self.index
            .get(namespace)
            .map(|&position| self.entries[position].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Namespace, &[MacroCall])> {
        self.entries
            .iter()
            .map(|(namespace, calls)| (namespace, calls.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of calls across namespaces
    pub fn call_count(&self) -> usize {
        self.entries.iter().map(|(_, calls)| calls.len()).sum()
    }
}
