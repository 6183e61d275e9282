//! Line-oriented reader for the subset of RBS the generator needs
//!
//! Understands class/module declarations, method definitions (with overload
//! continuation lines), attribute declarations, aliases, include and extend.
//! Interfaces are skipped; any other member is ignored.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::Namespace;
use crate::error::{GeneratorError, Result};
use super::type_expr::{return_type, split_overloads};
use super::{DeclKind, MethodDecl, MethodKind, TypeDecl};

struct Patterns {
    class: Regex,
    module: Regex,
    alias_decl: Regex,
    interface: Regex,
    def: Regex,
    attr: Regex,
    alias: Regex,
    mixin: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        class: Regex::new(
            r"^class\s+((?:::)?[A-Z][\w:]*)(?:\[[^\]]*\])?\s*(?:<\s*((?:::)?[A-Z][\w:]*))?",
        )
        .expect("Invalid class regex"),
        module: Regex::new(r"^module\s+((?:::)?[A-Z][\w:]*)").expect("Invalid module regex"),
        alias_decl: Regex::new(r"^(?:class|module)\s+\S+\s*=").expect("Invalid alias declaration regex"),
        interface: Regex::new(r"^interface\s+").expect("Invalid interface regex"),
        def: Regex::new(r"^def\s+(self\??\.)?([^\s:]+)\s*:\s*(.*)$").expect("Invalid def regex"),
        attr: Regex::new(r"^attr_(reader|writer|accessor)\s+(self\.)?(\w+)(?:\([^)]*\))?\s*:\s*(.+)$")
            .expect("Invalid attr regex"),
        alias: Regex::new(r"^alias\s+(self\.)?(\S+)\s+(?:self\.)?(\S+)$").expect("Invalid alias regex"),
        mixin: Regex::new(r"^(include|extend|prepend)\s+((?:::)?[A-Z][\w:]*)")
            .expect("Invalid mixin regex"),
    })
}

enum Frame {
    /// Index into the declaration list
    Decl(usize),
    /// Interface or other body whose members are not recorded
    Skip,
}

/// Method being read, kept open for `| overload` continuation lines
struct OpenMethod {
    decl: usize,
    name: String,
    kinds: Vec<MethodKind>,
    types: String,
}

struct SignatureReader<'p> {
    path: &'p Path,
    decls: Vec<TypeDecl>,
    frames: Vec<Frame>,
    open_method: Option<OpenMethod>,
    aliases: Vec<(usize, MethodKind, String, String)>,
}

/// Parse one RBS file into type declarations with names as written
///
/// Declaration names are absolute; superclasses, mixins and method types are
/// left relative for the loader to resolve once everything is loaded.
pub fn parse_signature(content: &str, path: &Path) -> Result<Vec<TypeDecl>> {
    let mut reader = SignatureReader {
        path,
        decls: Vec::new(),
        frames: Vec::new(),
        open_method: None,
        aliases: Vec::new(),
    };

    for (index, raw) in content.lines().enumerate() {
        reader.read_line(raw, index + 1)?;
    }
    reader.finish(content.lines().count())
}

impl<'p> SignatureReader<'p> {
    fn read_line(&mut self, raw: &str, line: usize) -> Result<()> {
        let text = strip_line(raw);
        if text.is_empty() {
            return Ok(());
        }

        if let Some(overload) = text.strip_prefix('|') {
            if let Some(method) = &mut self.open_method {
                method.types.push_str(" | ");
                method.types.push_str(overload.trim());
                return Ok(());
            }
        }
        self.close_method();

        let patterns = patterns();

        if text == "end" {
            return match self.frames.pop() {
                Some(_) => Ok(()),
                None => Err(self.error(line, "unexpected `end`")),
            };
        }

        if patterns.alias_decl.is_match(text) {
            return Ok(());
        }

        if patterns.interface.is_match(text) {
            if !closes_inline(text) {
                self.frames.push(Frame::Skip);
            }
            return Ok(());
        }

        if let Some(captures) = patterns.class.captures(text) {
            let superclass = captures.get(2).and_then(|m| Namespace::parse(m.as_str()));
            self.open_decl(&captures[1], DeclKind::Class { superclass }, line)?;
            self.close_inline(text);
            return Ok(());
        }

        if let Some(captures) = patterns.module.captures(text) {
            self.open_decl(&captures[1], DeclKind::Module, line)?;
            self.close_inline(text);
            return Ok(());
        }

        let current = match self.frames.last() {
            Some(Frame::Decl(index)) => *index,
            Some(Frame::Skip) => return Ok(()),
            None => {
                if patterns.def.is_match(text) || patterns.mixin.is_match(text) {
                    return Err(self.error(line, "member outside of a class or module"));
                }
                return Ok(());
            }
        };

        if let Some(captures) = patterns.def.captures(text) {
            let kinds = match captures.get(1).map(|m| m.as_str()) {
                Some("self.") => vec![MethodKind::Singleton],
                Some("self?.") => vec![MethodKind::Singleton, MethodKind::Instance],
                _ => vec![MethodKind::Instance],
            };
            self.open_method = Some(OpenMethod {
                decl: current,
                name: captures[2].to_string(),
                kinds,
                types: captures[3].trim().to_string(),
            });
            return Ok(());
        }

        if let Some(captures) = patterns.attr.captures(text) {
            let kind = if captures.get(2).is_some() {
                MethodKind::Singleton
            } else {
                MethodKind::Instance
            };
            let name = &captures[3];
            let ty = captures[4].trim().to_string();

            if matches!(&captures[1], "reader" | "accessor") {
                self.add_method(current, kind, name.to_string(), vec![ty.clone()]);
            }
            if matches!(&captures[1], "writer" | "accessor") {
                self.add_method(current, kind, format!("{}=", name), vec![ty]);
            }
            return Ok(());
        }

        if let Some(captures) = patterns.alias.captures(text) {
            let kind = if captures.get(1).is_some() {
                MethodKind::Singleton
            } else {
                MethodKind::Instance
            };
            self.aliases
                .push((current, kind, captures[2].to_string(), captures[3].to_string()));
            return Ok(());
        }

        if let Some(captures) = patterns.mixin.captures(text) {
            let Some(module) = Namespace::parse(&captures[2]) else {
                return Err(self.error(line, "invalid module name"));
            };
            let decl = &mut self.decls[current];
            match &captures[1] {
                "extend" => decl.extends.push(module),
                _ => decl.includes.push(module),
            }
        }

        Ok(())
    }

    fn open_decl(&mut self, written: &str, kind: DeclKind, line: usize) -> Result<()> {
        let Some(reference) = Namespace::parse(written) else {
            return Err(self.error(line, &format!("invalid type name `{}`", written)));
        };

        let outer = match self.frames.last() {
            Some(Frame::Decl(index)) => self.decls[*index].name.clone(),
            Some(Frame::Skip) => return Err(self.error(line, "declaration inside an interface")),
            None => Namespace::root(),
        };

        self.decls.push(TypeDecl::new(outer.join(&reference), kind));
        self.frames.push(Frame::Decl(self.decls.len() - 1));
        Ok(())
    }

    /// `class Foo end` opens and closes on the same line
    fn close_inline(&mut self, text: &str) {
        if closes_inline(text) {
            self.frames.pop();
        }
    }

    fn close_method(&mut self) {
        let Some(method) = self.open_method.take() else {
            return;
        };

        let return_types: Vec<String> = split_overloads(&method.types)
            .iter()
            .filter_map(|overload| return_type(overload))
            .collect();
        if return_types.is_empty() {
            return;
        }

        for kind in method.kinds {
            self.add_method(method.decl, kind, method.name.clone(), return_types.clone());
        }
    }

    fn add_method(&mut self, decl: usize, kind: MethodKind, name: String, return_types: Vec<String>) {
        let decl = &mut self.decls[decl];
        let methods = match kind {
            MethodKind::Instance => &mut decl.instance_methods,
            MethodKind::Singleton => &mut decl.singleton_methods,
        };
        methods.insert(name.clone(), MethodDecl { name, return_types });
    }

    fn finish(mut self, lines: usize) -> Result<Vec<TypeDecl>> {
        self.close_method();

        if !self.frames.is_empty() {
            return Err(self.error(lines, "unclosed declaration at end of file"));
        }

        let aliases = std::mem::take(&mut self.aliases);
        for (decl, kind, new_name, old_name) in aliases {
            let methods: &HashMap<String, MethodDecl> = self.decls[decl].methods(kind);
            if let Some(aliased) = methods.get(&old_name) {
                let return_types = aliased.return_types.clone();
                self.add_method(decl, kind, new_name, return_types);
            }
        }

        Ok(self.decls)
    }

    fn error(&self, line: usize, message: &str) -> GeneratorError {
        GeneratorError::Signature {
            path: self.path.to_path_buf(),
            line,
            message: message.to_string(),
        }
    }
}

fn closes_inline(text: &str) -> bool {
    text.strip_suffix("end")
        .map_or(false, |rest| rest.ends_with(|c: char| c.is_whitespace() || c == ';'))
}

/// Trim comments, annotations and visibility modifiers
fn strip_line(raw: &str) -> &str {
    let mut text = raw.split('#').next().unwrap_or("").trim();

    while text.starts_with("%a{") {
        match text.find('}') {
            Some(end) => text = text[end + 1..].trim_start(),
            None => return "",
        }
    }

    for modifier in ["private ", "public "] {
        if let Some(rest) = text.strip_prefix(modifier) {
            text = rest.trim_start();
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<TypeDecl> {
        parse_signature(content, Path::new("test.rbs")).unwrap()
    }

    #[test]
    fn test_nested_declarations_and_members() {
        let decls = parse(
            r#"
# A comment
module Shop
  class Order < Base
    include Enumerable[Item]
    extend Finders

    attr_reader total: Integer
    attr_accessor note: String?
    def self.count: () -> Integer
    def self?.build: () -> Order
    %a{pure} def item: () -> Item
                     | (Integer index) -> Item?
    private def secret: () -> String
    alias first_item item
  end

  interface _Priced
    def price: () -> Integer
  end
end
"#,
        );

        let names: Vec<String> = decls.iter().map(|d| d.name.to_string()).collect();
        assert_eq!(names, vec!["::Shop", "::Shop::Order"]);

        let order = &decls[1];
        assert_eq!(
            order.kind,
            DeclKind::Class { superclass: Namespace::parse("Base") }
        );
        assert_eq!(order.includes, vec![Namespace::parse("Enumerable").unwrap()]);
        assert_eq!(order.extends, vec![Namespace::parse("Finders").unwrap()]);

        let item = order.instance_methods.get("item").unwrap();
        assert_eq!(item.return_types, vec!["Item".to_string(), "Item?".to_string()]);
        assert_eq!(order.instance_methods.get("first_item").unwrap().return_types, item.return_types);

        assert_eq!(order.instance_methods.get("total").unwrap().return_type(), Some("Integer"));
        assert!(order.instance_methods.contains_key("note="));
        assert!(order.instance_methods.contains_key("secret"));
        assert!(order.instance_methods.contains_key("build"));
        assert!(order.singleton_methods.contains_key("build"));
        assert!(order.singleton_methods.contains_key("count"));
        assert!(!order.instance_methods.contains_key("price"));
    }

    #[test]
    fn test_compact_names_and_aliases() {
        let decls = parse("class Foo::Bar\nend\nclass Baz = Foo::Bar\nmodule ::Top\nend\n");
        let names: Vec<String> = decls.iter().map(|d| d.name.to_string()).collect();
        assert_eq!(names, vec!["::Foo::Bar", "::Top"]);
    }

    #[test]
    fn test_one_line_declarations() {
        let decls = parse("class Other end\nmodule Shop; end\ninterface _Named end\nclass Order < Other\nend\n");
        let names: Vec<String> = decls.iter().map(|d| d.name.to_string()).collect();
        assert_eq!(names, vec!["::Other", "::Shop", "::Order"]);
        assert_eq!(decls[2].kind, DeclKind::Class { superclass: Namespace::parse("Other") });
    }

    #[test]
    fn test_malformed_files_report_location() {
        let error = parse_signature("class Foo\n  def x: () -> void\n", Path::new("broken.rbs"))
            .unwrap_err();
        assert!(matches!(error, GeneratorError::Signature { line: 2, .. }));

        let error = parse_signature("end\n", Path::new("broken.rbs")).unwrap_err();
        assert!(matches!(error, GeneratorError::Signature { line: 1, .. }));

        let error = parse_signature("def x: () -> void\n", Path::new("broken.rbs")).unwrap_err();
        assert!(error.to_string().contains("broken.rbs:1"));
    }
}
