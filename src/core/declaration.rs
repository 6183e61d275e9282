//! Method signatures for the methods each macro call defines at runtime

use tracing::{debug, warn};

use super::env::TypeEnvironment;
use super::macros::{AccessorKind, AttributeOptions, DelegateOptions, Macro, MacroCall};
use super::method_resolver::MethodTypeResolver;
use super::mixin::MixinResolver;
use super::Namespace;

/// Signatures of one namespace: `(public, private)`, one entry per call
pub type Declarations = (Vec<String>, Vec<String>);

pub struct DeclarationBuilder<'e> {
    method_resolver: MethodTypeResolver<'e>,
    mixin_resolver: MixinResolver<'e>,
}

impl<'e> DeclarationBuilder<'e> {
    pub fn new(env: &'e dyn TypeEnvironment) -> Self {
        Self {
            method_resolver: MethodTypeResolver::new(env),
            mixin_resolver: MixinResolver::new(env),
        }
    }

    /// Build the signatures for every call of one namespace, in call order
    pub fn build(&self, namespace: &Namespace, calls: &[MacroCall]) -> Declarations {
        let mut public_decls = Vec::new();
        let mut private_decls = Vec::new();

        for call in calls {
            let lines = self.build_call(namespace, call);
            if lines.is_empty() {
                debug!("`{}` at line {} defines no methods", call.macro_def.method_name(), call.line);
                continue;
            }

            let block = lines.join("\n");
            if call.private {
                private_decls.push(block);
            } else {
                public_decls.push(block);
            }
        }

        (public_decls, private_decls)
    }

    fn build_call(&self, namespace: &Namespace, call: &MacroCall) -> Vec<String> {
        match &call.macro_def {
            Macro::Delegate { methods, options } => self.build_delegate(namespace, methods, options),
            Macro::ClassAttribute { names, options } => build_class_attribute(names, options),
            Macro::ClassAccessor { kind, names, options, .. } => {
                build_class_accessor(*kind, names, options)
            }
            Macro::Include { modules } => self.build_include(namespace, modules),
        }
    }

    fn build_delegate(&self, namespace: &Namespace, methods: &[String], options: &DelegateOptions) -> Vec<String> {
        methods
            .iter()
            .map(|method| {
                let return_type = self
                    .method_resolver
                    .resolve_delegation(namespace, &options.to, method);
                format!("def {}: () -> {}", options.method_name(method), return_type)
            })
            .collect()
    }

    fn build_include(&self, namespace: &Namespace, modules: &[Namespace]) -> Vec<String> {
        let mut lines = Vec::new();

        for reference in modules {
            let Some(mixin) = self.mixin_resolver.resolve(namespace, reference) else {
                warn!("Skipping `include {}` in {}: module not found", reference, namespace);
                continue;
            };

            lines.push(format!("include {}", mixin.module));
            if mixin.extends_class_methods() {
                lines.push(format!("extend {}", mixin.class_methods_module()));
            }
        }

        lines
    }
}

/// `class_attribute`: class reader/writer/predicate, then the instance ones
fn build_class_attribute(names: &[String], options: &AttributeOptions) -> Vec<String> {
    let mut lines = Vec::new();

    for name in names {
        lines.push(format!("def self.{}: () -> untyped", name));
        lines.push(format!("def self.{}=: (untyped) -> untyped", name));
        if options.instance_predicate {
            lines.push(format!("def self.{}?: () -> bool", name));
        }

        if options.instance_reader() {
            lines.push(format!("def {}: () -> untyped", name));
        }
        if options.instance_writer() {
            lines.push(format!("def {}=: (untyped) -> untyped", name));
        }
        if options.instance_reader() && options.instance_predicate {
            lines.push(format!("def {}?: () -> bool", name));
        }
    }

    lines
}

/// `cattr_*` / `mattr_*`: class-level forms always, instance forms unless disabled
fn build_class_accessor(kind: AccessorKind, names: &[String], options: &AttributeOptions) -> Vec<String> {
    let mut lines = Vec::new();

    for name in names {
        if kind.defines_reader() {
            lines.push(format!("def self.{}: () -> untyped", name));
        }
        if kind.defines_writer() {
            lines.push(format!("def self.{}=: (untyped) -> untyped", name));
        }
        if kind.defines_reader() && options.instance_reader() {
            lines.push(format!("def {}: () -> untyped", name));
        }
        if kind.defines_writer() && options.instance_writer() {
            lines.push(format!("def {}=: (untyped) -> untyped", name));
        }
    }

    lines
}
