//! Tree-sitter based AST/CST/entity extraction (spec §4.2's parse step,
//! feeding `SqlEngine::index_file`).

use crate::error::{ChunkerError, Result};
use crate::language::Language;
use codeintel_store::{ChunkSourceType, EntityKind, NewChunk, NewEntity, ParsedFileData};
use std::path::Path;
use tree_sitter::{Node, Parser};

pub fn parse_file(path: &Path, source: &str) -> Result<ParsedFileData> {
    let language = Language::from_path(path);

    if language.supports_ast() {
        parse_with_tree_sitter(language, source)
    } else {
        parse_without_ast(language, source)
    }
}

fn parse_with_tree_sitter(language: Language, source: &str) -> Result<ParsedFileData> {
    let ts_language = language.tree_sitter_language()?;
    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|_| ChunkerError::unsupported_language(language.as_str()))?;
    let tree = parser.parse(source, None).ok_or(ChunkerError::ParseFailed)?;
    let source_bytes = source.as_bytes();

    let ast_content = tree.root_node().to_sexp().into_bytes();
    let cst_content = serde_json::to_vec(&cst_nodes(tree.root_node())).unwrap_or_default();

    let mut entities = Vec::new();
    let mut parent_stack: Vec<usize> = Vec::new();
    walk_entities(tree.root_node(), source_bytes, language, &mut parent_stack, &mut entities);

    let mut chunks: Vec<NewChunk> = Vec::new();
    if let Some(file_doc) = leading_comment_block(source, language) {
        chunks.push(NewChunk {
            entity_index: None,
            source_type: ChunkSourceType::FileDocstring,
            text: file_doc,
        });
    }
    for (idx, entity) in entities.iter().enumerate() {
        chunks.push(NewChunk {
            entity_index: Some(idx),
            source_type: ChunkSourceType::Code,
            text: slice_lines(source, entity.start_line, entity.end_line),
        });
    }

    let ast_hash = blake3::hash(&ast_content).to_hex().to_string();
    let cst_hash = blake3::hash(&cst_content).to_hex().to_string();

    Ok(ParsedFileData {
        ast_content,
        ast_hash,
        cst_content,
        cst_hash,
        code_content: source.to_string(),
        entities,
        chunks,
    })
}

fn parse_without_ast(language: Language, source: &str) -> Result<ParsedFileData> {
    let lines: Vec<&str> = source.lines().collect();
    let import_lines = crate::contextual_imports::extract_imports_from_lines(language, &lines, 200);
    let entities: Vec<NewEntity> = import_lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| NewEntity {
            kind: EntityKind::Import,
            name: text,
            qualname: None,
            start_line: (i + 1) as u32,
            end_line: (i + 1) as u32,
            docstring: None,
            parent_index: None,
        })
        .collect();

    let mut chunks = Vec::new();
    if let Some(file_doc) = leading_comment_block(source, language) {
        chunks.push(NewChunk { entity_index: None, source_type: ChunkSourceType::FileDocstring, text: file_doc });
    }
    if !source.trim().is_empty() {
        chunks.push(NewChunk { entity_index: None, source_type: ChunkSourceType::Code, text: source.to_string() });
    }

    Ok(ParsedFileData {
        ast_content: Vec::new(),
        ast_hash: blake3::hash(b"").to_hex().to_string(),
        cst_content: Vec::new(),
        cst_hash: blake3::hash(b"").to_hex().to_string(),
        code_content: source.to_string(),
        entities,
        chunks,
    })
}

#[derive(serde::Serialize)]
struct CstNode {
    kind: String,
    start_byte: usize,
    end_byte: usize,
    children: Vec<CstNode>,
}

/// Every node including anonymous tokens — the full concrete syntax tree,
/// as distinct from the named-node-only AST captured in `ast_content`.
fn cst_nodes(node: Node<'_>) -> CstNode {
    let mut cursor = node.walk();
    let children = node.children(&mut cursor).map(cst_nodes).collect();
    CstNode {
        kind: node.kind().to_string(),
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        children,
    }
}

fn container_node_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &["impl_item", "trait_item"],
        Language::Python => &["class_definition"],
        Language::JavaScript | Language::TypeScript => &["class_declaration"],
        _ => &[],
    }
}

fn classify(language: Language, kind: &str) -> Option<EntityKind> {
    match (language, kind) {
        (Language::Rust, "function_item") => Some(EntityKind::Function),
        (Language::Rust, "struct_item" | "enum_item" | "trait_item" | "impl_item") => Some(EntityKind::Class),
        (Language::Rust, "use_declaration") => Some(EntityKind::Import),

        (Language::Python, "function_definition") => Some(EntityKind::Function),
        (Language::Python, "class_definition") => Some(EntityKind::Class),
        (Language::Python, "import_statement" | "import_from_statement") => Some(EntityKind::Import),

        (Language::JavaScript | Language::TypeScript, "function_declaration") => Some(EntityKind::Function),
        (Language::JavaScript | Language::TypeScript, "method_definition") => Some(EntityKind::Method),
        (Language::JavaScript | Language::TypeScript, "class_declaration") => Some(EntityKind::Class),
        (Language::JavaScript | Language::TypeScript, "import_statement") => Some(EntityKind::Import),

        _ => None,
    }
}

fn node_name(node: Node<'_>, source: &[u8]) -> String {
    let named = node
        .child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string);
    named.unwrap_or_else(|| node.kind().to_string())
}

fn walk_entities(
    node: Node<'_>,
    source: &[u8],
    language: Language,
    parent_stack: &mut Vec<usize>,
    entities: &mut Vec<NewEntity>,
) {
    let kind = node.kind();
    let mut pushed_container = false;

    if let Some(mut classified) = classify(language, kind) {
        // A function nested inside a class/impl/trait container is a
        // method rather than a free function.
        if classified == EntityKind::Function && !parent_stack.is_empty() {
            classified = EntityKind::Method;
        }

        let entity = NewEntity {
            kind: classified,
            name: node_name(node, source),
            qualname: None,
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
            docstring: None,
            parent_index: parent_stack.last().copied(),
        };
        let index = entities.len();
        entities.push(entity);

        if container_node_kinds(language).contains(&kind) {
            parent_stack.push(index);
            pushed_container = true;
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_entities(child, source, language, parent_stack, entities);
    }

    if pushed_container {
        parent_stack.pop();
    }
}

fn leading_comment_block(source: &str, language: Language) -> Option<String> {
    let prefixes = language.comment_prefixes();
    if prefixes.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        if prefixes.iter().any(|p| trimmed.starts_with(p)) {
            lines.push(trimmed.to_string());
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn slice_lines(source: &str, start_line: u32, end_line: u32) -> String {
    source
        .lines()
        .skip((start_line.saturating_sub(1)) as usize)
        .take((end_line.saturating_sub(start_line) + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_rust_functions_and_structs() {
        let source = "pub struct Foo;\n\nimpl Foo {\n    pub fn bar(&self) -> i32 { 1 }\n}\n";
        let parsed = parse_file(Path::new("x.rs"), source).unwrap();
        let kinds: Vec<EntityKind> = parsed.entities.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EntityKind::Class));
        assert!(kinds.contains(&EntityKind::Method));
        assert!(!parsed.ast_hash.is_empty());
        assert!(!parsed.chunks.is_empty());
    }

    #[test]
    fn extracts_python_class_and_methods() {
        let source = "class Foo:\n    def bar(self):\n        return 1\n";
        let parsed = parse_file(Path::new("x.py"), source).unwrap();
        let method = parsed.entities.iter().find(|e| e.name == "bar").unwrap();
        assert_eq!(method.kind, EntityKind::Method);
        let class = parsed.entities.iter().find(|e| e.name == "Foo").unwrap();
        assert_eq!(class.kind, EntityKind::Class);
    }

    #[test]
    fn non_ast_language_still_produces_a_code_chunk() {
        let parsed = parse_file(Path::new("README.md"), "# Title\n\nBody text.\n").unwrap();
        assert!(parsed.entities.is_empty());
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].source_type, ChunkSourceType::Code);
    }

    #[test]
    fn leading_doc_comment_becomes_file_docstring_chunk() {
        let source = "# a file header\n# second line\n\ndef f():\n    pass\n";
        let parsed = parse_file(Path::new("x.py"), source).unwrap();
        let doc = parsed.chunks.iter().find(|c| c.source_type == ChunkSourceType::FileDocstring);
        assert!(doc.is_some());
    }
}
