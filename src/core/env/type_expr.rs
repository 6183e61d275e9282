//! Helpers over RBS type expressions kept as text

use std::sync::OnceLock;

use regex::{Match, Regex};

use crate::core::Namespace;

fn constant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:::)?[A-Z][A-Za-z0-9_]*(?:::[A-Z][A-Za-z0-9_]*)*")
            .expect("Invalid constant path regex")
    })
}

/// Constant paths in `ty`, skipping matches glued to a preceding identifier (`_Each`)
fn constant_paths(ty: &str) -> impl Iterator<Item = Match<'_>> {
    constant_pattern().find_iter(ty).filter(move |m| {
        !ty[..m.start()]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Rewrite every relative type name in `ty` with `resolve`; unresolvable names stay as written
pub fn absolutize(ty: &str, mut resolve: impl FnMut(&Namespace) -> Option<Namespace>) -> String {
    let mut output = String::with_capacity(ty.len());
    let mut last = 0;

    for found in constant_paths(ty) {
        output.push_str(&ty[last..found.start()]);
        let replacement = Namespace::parse(found.as_str())
            .filter(|name| !name.is_absolute())
            .and_then(|name| resolve(&name));
        match replacement {
            Some(name) => output.push_str(&name.to_string()),
            None => output.push_str(found.as_str()),
        }
        last = found.end();
    }

    output.push_str(&ty[last..]);
    output
}

/// Whether every type name in `ty` is absolute
pub fn is_resolved(ty: &str) -> bool {
    constant_paths(ty).all(|m| m.as_str().starts_with("::"))
}

/// Replace the keyword `word` with `replacement` where it stands alone
pub fn substitute_keyword(ty: &str, word: &str, replacement: &str) -> String {
    let mut output = String::with_capacity(ty.len());
    let mut rest = ty;

    while let Some(position) = rest.find(word) {
        let before = rest[..position].chars().next_back();
        let after = rest[position + word.len()..].chars().next();
        let standalone = !before.map_or(false, is_identifier_char)
            && !after.map_or(false, |c| is_identifier_char(c) || c == '(');

        output.push_str(&rest[..position]);
        output.push_str(if standalone { replacement } else { word });
        rest = &rest[position + word.len()..];
    }

    output.push_str(rest);
    output
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Return type of a method type: the part after the first top-level `->`
pub fn return_type(method_type: &str) -> Option<String> {
    let mut depth = 0i32;
    let mut arrow = None;
    let bytes = method_type.as_bytes();

    for (index, &byte) in bytes.iter().enumerate() {
        match byte {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'-' if depth == 0 && bytes.get(index + 1) == Some(&b'>') => {
                arrow = Some(index);
                break;
            }
            _ => {}
        }
    }

    let ty = method_type[arrow? + 2..].trim();
    if ty.is_empty() {
        None
    } else {
        Some(ty.to_string())
    }
}

/// Split overloads on top-level `|`
///
/// A `|` followed by something other than the start of a method type is a
/// union inside the return type and does not split.
pub fn split_overloads(method_types: &str) -> Vec<String> {
    let mut overloads = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (index, c) in method_types.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '|' if depth == 0 && starts_method_type(&method_types[index + 1..]) => {
                overloads.push(method_types[start..index].trim().to_string());
                start = index + 1;
            }
            _ => {}
        }
    }
    overloads.push(method_types[start..].trim().to_string());

    overloads
        .into_iter()
        .filter(|overload| !overload.is_empty() && overload != "...")
        .collect()
}

fn starts_method_type(rest: &str) -> bool {
    let rest = rest.trim_start();
    ["(", "[", "{", "->", "...", "%a"]
        .iter()
        .any(|start| rest.starts_with(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_skips_interfaces_and_absolute_names() {
        let resolved = absolutize("Array[String] | _Each[Integer] | ::Foo | Elem", |name| {
            match name.to_string().as_str() {
                "Array" | "String" | "Integer" => Some(name.to_absolute()),
                _ => None,
            }
        });
        assert_eq!(resolved, "::Array[::String] | _Each[::Integer] | ::Foo | Elem");
    }

    #[test]
    fn test_is_resolved() {
        assert!(is_resolved("::String?"));
        assert!(is_resolved("bool"));
        assert!(!is_resolved("::Array[Elem]"));
    }

    #[test]
    fn test_return_type_ignores_block_arrows() {
        assert_eq!(return_type("() -> ::String"), Some("::String".to_string()));
        assert_eq!(
            return_type("(Integer) { (String) -> void } -> Array[String]"),
            Some("Array[String]".to_string())
        );
        assert_eq!(return_type("() -> ^() -> void"), Some("^() -> void".to_string()));
        assert_eq!(return_type("(Integer)"), None);
    }

    #[test]
    fn test_split_overloads() {
        let overloads = split_overloads("() -> String | (Integer) { (A | B) -> void } -> Symbol | ...");
        assert_eq!(
            overloads,
            vec!["() -> String".to_string(), "(Integer) { (A | B) -> void } -> Symbol".to_string()]
        );

        let union = split_overloads("() -> String | Integer");
        assert_eq!(union, vec!["() -> String | Integer".to_string()]);
    }

    #[test]
    fn test_substitute_keyword() {
        assert_eq!(substitute_keyword("self", "self", "::Foo"), "::Foo");
        assert_eq!(substitute_keyword("Array[self]?", "self", "::Foo"), "Array[::Foo]?");
        assert_eq!(substitute_keyword("singleton(self)", "singleton", "x"), "singleton(self)");
        assert_eq!(substitute_keyword("myself", "self", "::Foo"), "myself");
        assert_eq!(substitute_keyword("self?", "self", "::Foo"), "::Foo?");
    }
}
