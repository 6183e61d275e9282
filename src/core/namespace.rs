use std::fmt;

use serde::{Serialize, Serializer};

/// Nesting path of a class or module, e.g. `::Foo::Bar`
///
/// Also used as a type name: the absolute namespace `::Foo::Bar` names the
/// constant `Bar` inside `Foo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    path: Vec<String>,
    absolute: bool,
}

impl Namespace {
    pub fn new(path: Vec<String>, absolute: bool) -> Self {
        Self { path, absolute }
    }

    /// The top-level (global) namespace
    pub fn root() -> Self {
        Self::new(Vec::new(), true)
    }

    /// Parse `::A::B` (absolute) or `A::B` (relative)
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (absolute, rest) = match text.strip_prefix("::") {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        if rest.is_empty() {
            return if absolute { Some(Self::root()) } else { None };
        }

        let mut path = Vec::new();
        for segment in rest.split("::") {
            if !is_constant_name(segment) {
                return None;
            }
            path.push(segment.to_string());
        }

        Some(Self::new(path, absolute))
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Last path segment
    pub fn name(&self) -> Option<&str> {
        self.path.last().map(|s| s.as_str())
    }

    /// Drop the last segment; the parent of the root is the root
    pub fn parent(&self) -> Self {
        let mut path = self.path.clone();
        path.pop();
        Self::new(path, self.absolute)
    }

    pub fn append(&self, segment: &str) -> Self {
        let mut path = self.path.clone();
        path.push(segment.to_string());
        Self::new(path, self.absolute)
    }

    /// `self + other`; an absolute `other` ignores `self`
    pub fn join(&self, other: &Namespace) -> Self {
        if other.absolute {
            return other.clone();
        }

        let mut path = self.path.clone();
        path.extend(other.path.iter().cloned());
        Self::new(path, self.absolute)
    }

    /// Same path anchored at the root
    pub fn to_absolute(&self) -> Self {
        Self::new(self.path.clone(), true)
    }

    /// Every non-empty prefix, outermost first: `::A`, `::A::B`
    pub fn prefixes(&self) -> impl Iterator<Item = Namespace> + '_ {
        (1..=self.path.len()).map(move |len| Self::new(self.path[..len].to_vec(), self.absolute))
    }

    /// This namespace and its enclosing namespaces, innermost first, ending at the root
    pub fn ancestors(&self) -> impl Iterator<Item = Namespace> + '_ {
        (0..=self.path.len())
            .rev()
            .map(move |len| Self::new(self.path[..len].to_vec(), self.absolute))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "::")?;
        }
        write!(f, "{}", self.path.join("::"))
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Resolve `reference` as seen from `context`, mirroring Ruby constant lookup
///
/// Tries `context + reference`, then each enclosing namespace outward up to
/// the root; the first candidate `exists` accepts wins. Absolute references
/// are only checked as written.
pub fn lookup_constant(
    context: &Namespace,
    reference: &Namespace,
    exists: impl Fn(&Namespace) -> bool,
) -> Option<Namespace> {
    if reference.is_absolute() {
        return exists(reference).then(|| reference.clone());
    }

    context
        .to_absolute()
        .ancestors()
        .map(|scope| scope.join(reference))
        .find(|candidate| exists(candidate))
}

/// Ruby constant names start with an uppercase ASCII letter
pub fn is_constant_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
