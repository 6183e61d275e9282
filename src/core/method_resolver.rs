use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::env::type_expr;
use super::env::{MethodKind, TypeEnvironment};
use super::namespace::is_constant_name;
use super::Namespace;

/// Result of a method type lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedType {
    /// Return type with every type name absolute
    Typed(String),
    /// Nothing could be recovered statically
    Untyped,
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedType::Typed(ty) => write!(f, "{}", ty),
            ResolvedType::Untyped => write!(f, "untyped"),
        }
    }
}

/// Receiver a method is looked up on
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Instance(Namespace),
    Singleton(Namespace),
}

impl Owner {
    /// `::Foo` or `singleton(::Foo)`; anything else has no usable owner
    fn parse(ty: &str) -> Option<Self> {
        let ty = ty.trim();
        if let Some(inner) = ty.strip_prefix("singleton(").and_then(|rest| rest.strip_suffix(')')) {
            return Namespace::parse(inner)
                .filter(|name| name.is_absolute())
                .map(Owner::Singleton);
        }
        Namespace::parse(ty)
            .filter(|name| name.is_absolute() && !name.is_empty())
            .map(Owner::Instance)
    }

    fn parts(&self) -> (&Namespace, MethodKind) {
        match self {
            Owner::Instance(name) => (name, MethodKind::Instance),
            Owner::Singleton(name) => (name, MethodKind::Singleton),
        }
    }

    /// Replace `self`, `instance` and `class` in a return type of this owner
    fn specialize(&self, ty: &str) -> String {
        let (self_type, instance_type, class_type) = match self {
            Owner::Instance(name) => (name.to_string(), name.to_string(), format!("singleton({})", name)),
            Owner::Singleton(name) => (format!("singleton({})", name), name.to_string(), "::Class".to_string()),
        };

        let ty = type_expr::substitute_keyword(ty, "self", &self_type);
        let ty = type_expr::substitute_keyword(&ty, "instance", &instance_type);
        type_expr::substitute_keyword(&ty, "class", &class_type)
    }
}

/// Looks up declared return types in the type environment
pub struct MethodTypeResolver<'e> {
    env: &'e dyn TypeEnvironment,
}

impl<'e> MethodTypeResolver<'e> {
    pub fn new(env: &'e dyn TypeEnvironment) -> Self {
        Self { env }
    }

    /// Return type of instance method `method` on the type named by `namespace`
    pub fn resolve(&self, namespace: &Namespace, method: &str) -> ResolvedType {
        self.resolve_on(&Owner::Instance(namespace.to_absolute()), method)
    }

    /// Return type of `method` reached through `target` from `namespace`
    ///
    /// Resolves the target's own type first, then the method on that type.
    /// Either hop failing yields [`ResolvedType::Untyped`].
    pub fn resolve_delegation(&self, namespace: &Namespace, target: &str, method: &str) -> ResolvedType {
        match self.target_owner(namespace, target) {
            Some(owner) => self.resolve_on(&owner, method),
            None => {
                debug!("Cannot type delegation target `{}` in {}", target, namespace);
                ResolvedType::Untyped
            }
        }
    }

    fn target_owner(&self, namespace: &Namespace, target: &str) -> Option<Owner> {
        let namespace = namespace.to_absolute();

        if target == "class" {
            return Some(Owner::Singleton(namespace));
        }

        if target.split("::").all(is_constant_name) {
            let reference = Namespace::parse(target)?;
            return self
                .env
                .resolve_constant(&namespace, &reference)
                .map(Owner::Singleton);
        }

        let first = target.chars().next()?;
        if first.is_ascii_lowercase() || first == '_' {
            return match self.resolve(&namespace, target) {
                ResolvedType::Typed(ty) => Owner::parse(&ty),
                ResolvedType::Untyped => None,
            };
        }

        None
    }

    fn resolve_on(&self, owner: &Owner, method: &str) -> ResolvedType {
        let (name, kind) = owner.parts();

        let Some(decl) = self.env.find_method(name, method, kind) else {
            debug!("No declaration for `{}` on {:?}", method, owner);
            return ResolvedType::Untyped;
        };
        let Some(ty) = decl.return_type() else {
            return ResolvedType::Untyped;
        };

        let ty = owner.specialize(ty);
        if ty == "untyped" || !type_expr::is_resolved(&ty) {
            return ResolvedType::Untyped;
        }

        ResolvedType::Typed(ty)
    }
}
