use serde::Serialize;
use tracing::debug;

use super::env::TypeEnvironment;
use super::Namespace;

/// An `include` target after constant lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMixin {
    /// Absolute name of the included module
    pub module: Namespace,
    /// Module extends `ActiveSupport::Concern`
    pub concern: bool,
    /// `<module>::ClassMethods` exists
    pub class_methods: bool,
}

impl ResolvedMixin {
    pub fn class_methods_module(&self) -> Namespace {
        self.module.append("ClassMethods")
    }

    /// Whether including this module also extends the includer with `ClassMethods`
    pub fn extends_class_methods(&self) -> bool {
        self.concern && self.class_methods
    }
}

/// Resolves module references of `include` calls
pub struct MixinResolver<'e> {
    env: &'e dyn TypeEnvironment,
}

impl<'e> MixinResolver<'e> {
    pub fn new(env: &'e dyn TypeEnvironment) -> Self {
        Self { env }
    }

    /// Resolve `reference` as seen from `context`, innermost namespace first
    ///
    /// Returns `None` when no enclosing namespace knows the module.
    pub fn resolve(&self, context: &Namespace, reference: &Namespace) -> Option<ResolvedMixin> {
        let Some(module) = self.env.resolve_constant(context, reference) else {
            debug!("Module {} is not visible from {}", reference, context);
            return None;
        };

        let concern = self.env.is_concern(&module);
        let class_methods = self.env.type_exists(&module.append("ClassMethods"));

        Some(ResolvedMixin {
            module,
            concern,
            class_methods,
        })
    }
}
