use tree_sitter::{Node, Parser, Tree};

use crate::error::{GeneratorError, Result};

/// Ruby parser using Tree-sitter
pub struct RubyParser {
    parser: Parser,
}

impl RubyParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let ruby_language = tree_sitter_ruby::language();
        parser.set_language(&ruby_language)
            .map_err(|e| GeneratorError::Parser(format!("Failed to set Ruby language: {}", e)))?;

        Ok(Self { parser })
    }

    /// Parse Ruby source, rejecting trees that contain syntax errors
    pub fn parse(&mut self, content: &str) -> Result<Tree> {
        let tree = self.parser.parse(content, None)
            .ok_or_else(|| GeneratorError::Parser("Failed to parse Ruby code".to_string()))?;

        if let Some(error) = first_error(tree.root_node()) {
            let position = error.start_position();
            return Err(GeneratorError::Parser(format!(
                "syntax error at line {}, column {}",
                position.row + 1,
                position.column + 1
            )));
        }

        Ok(tree)
    }
}

/// Depth-first search for the first error or missing node
fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}
