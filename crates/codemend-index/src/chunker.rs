//! Syntax-aware chunk extraction with a fixed-window fallback.
//!
//! A file is split into imports, definitions and the leftover statement runs
//! between them. Files without a grammar, or whose parse tree has errors, are
//! cut into 50-line windows instead.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, NodeClass};

/// Lines per window when no syntax tree is available.
pub const GENERIC_WINDOW_LINES: usize = 50;

/// Closed classification of extracted chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkType {
    Import,
    FunctionDef,
    ClassDef,
    Statement,
    GenericBlock,
}

impl ChunkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "Import",
            Self::FunctionDef => "FunctionDef",
            Self::ClassDef => "ClassDef",
            Self::Statement => "Statement",
            Self::GenericBlock => "GenericBlock",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Import" => Ok(Self::Import),
            "FunctionDef" => Ok(Self::FunctionDef),
            "ClassDef" => Ok(Self::ClassDef),
            "Statement" => Ok(Self::Statement),
            "GenericBlock" => Ok(Self::GenericBlock),
            other => Err(format!("unknown chunk type: {other}")),
        }
    }
}

/// A contiguous, line-addressed unit of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub file_path: String,
    pub content: String,
    pub content_hash: String,
    pub chunk_type: ChunkType,
    pub name: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
}

impl Chunk {
    #[must_use]
    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// BLAKE3 hex digest used as the chunk identity.
#[must_use]
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Split `source` into chunks. Never fails: unparseable input falls back to
/// fixed line windows.
#[must_use]
pub fn extract(file_path: &str, source: &str, lang: Option<Lang>) -> Vec<Chunk> {
    if source.trim().is_empty() {
        return Vec::new();
    }

    match lang.map(|lang| parse_chunks(file_path, source, lang)) {
        Some(Ok(chunks)) => chunks,
        Some(Err(e)) => {
            tracing::debug!("{e}; using {GENERIC_WINDOW_LINES}-line windows");
            generic_chunks(file_path, source)
        }
        None => generic_chunks(file_path, source),
    }
}

/// Syntax-aware extraction.
///
/// # Errors
///
/// Returns `IndexError::Parse` when no grammar is compiled in for `lang` or the
/// parse tree contains syntax errors.
pub fn parse_chunks(file_path: &str, source: &str, lang: Lang) -> Result<Vec<Chunk>> {
    let parse_error = |reason: String| IndexError::Parse {
        path: file_path.to_owned(),
        reason,
    };

    let grammar = lang
        .grammar()
        .ok_or_else(|| parse_error(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| parse_error(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| parse_error("parser returned no tree".into()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(parse_error("syntax errors in source".into()));
    }

    let lines: Vec<&str> = source.lines().collect();
    let mut extraction = Extraction {
        file_path,
        source,
        lines: &lines,
        lang,
        claimed: HashSet::new(),
        comment_rows: HashSet::new(),
        chunks: Vec::new(),
    };

    extraction.collect_comment_rows(root);
    extraction.collect_imports(root);
    extraction.collect_definitions(root);
    extraction.sweep_statements();

    Ok(extraction.chunks)
}

/// Fixed windows of [`GENERIC_WINDOW_LINES`] lines named `chunk_<index>`.
#[must_use]
pub fn generic_chunks(file_path: &str, source: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();

    lines
        .chunks(GENERIC_WINDOW_LINES)
        .enumerate()
        .filter(|(_, window)| window.iter().any(|l| !l.trim().is_empty()))
        .map(|(index, window)| {
            let start_line = index * GENERIC_WINDOW_LINES + 1;
            let content = window.join("\n");
            Chunk {
                file_path: file_path.to_owned(),
                content_hash: content_hash(&content),
                content,
                chunk_type: ChunkType::GenericBlock,
                name: format!("chunk_{index}"),
                start_line,
                end_line: start_line + window.len() - 1,
            }
        })
        .collect()
}

struct Extraction<'a> {
    file_path: &'a str,
    source: &'a str,
    lines: &'a [&'a str],
    lang: Lang,
    /// 0-based rows already covered by an emitted chunk.
    claimed: HashSet<usize>,
    /// 0-based rows holding nothing but comment text, block comment interiors
    /// included.
    comment_rows: HashSet<usize>,
    chunks: Vec<Chunk>,
}

impl Extraction<'_> {
    fn collect_comment_rows(&mut self, root: Node<'_>) {
        let comment_kinds = self.lang.comment_kinds();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if comment_kinds.contains(&node.kind()) {
                self.mark_comment(node);
                continue;
            }
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor));
        }
    }

    fn mark_comment(&mut self, node: Node<'_>) {
        let start = node.start_position();
        let end = node.end_position();

        for row in start.row..=end.row {
            let Some(line) = self.lines.get(row) else {
                break;
            };
            let from = if row == start.row { start.column } else { 0 };
            let to = if row == end.row { end.column } else { line.len() };
            let blank_before = line
                .get(..from.min(line.len()))
                .is_some_and(|s| s.trim().is_empty());
            let blank_after = line
                .get(to.min(line.len())..)
                .is_some_and(|s| s.trim().is_empty());
            if blank_before && blank_after {
                self.comment_rows.insert(row);
            }
        }
    }

    fn is_comment_row(&self, row: usize, trimmed: &str) -> bool {
        self.comment_rows.contains(&row) || self.lang.is_comment_only(trimmed)
    }

    fn collect_imports(&mut self, root: Node<'_>) {
        let import_kinds = self.lang.import_kinds();
        let mut cursor = root.walk();

        let span = root
            .named_children(&mut cursor)
            .filter(|child| import_kinds.contains(&child.kind()))
            .map(|child| self.row_span(child))
            .reduce(|(a_start, a_end), (b_start, b_end)| (a_start.min(b_start), a_end.max(b_end)));

        if let Some((start, end)) = span {
            self.emit(ChunkType::Import, "imports".into(), start, end);
        }
    }

    fn collect_definitions(&mut self, root: Node<'_>) {
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            // Node whose children are explored next; a decorated wrapper skips
            // straight to the wrapped definition's children.
            let mut descend = node;

            match self.lang.classify(node.kind()) {
                Some(NodeClass::Definition(chunk_type)) if self.is_complete(node) => {
                    let (start, end) = self.row_span(node);
                    let start = self.attached_prefix_start(node).unwrap_or(start);
                    let name = self.definition_name(node);
                    self.emit(chunk_type, name, start, end);
                }
                Some(NodeClass::Decorated) => {
                    if let Some((inner, chunk_type)) = self.wrapped_definition(node) {
                        let (start, end) = self.row_span(node);
                        let name = self.definition_name(inner);
                        self.emit(chunk_type, name, start, end);
                        descend = inner;
                    }
                }
                _ => {}
            }

            let mut cursor = descend.walk();
            let children: Vec<Node<'_>> = descend.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    fn sweep_statements(&mut self) {
        let mut run_start: Option<usize> = None;

        for row in 0..self.lines.len() {
            let trimmed = self.lines[row].trim();
            if trimmed.is_empty() || self.claimed.contains(&row) {
                if let Some(start) = run_start.take() {
                    self.emit(ChunkType::Statement, "code_block".into(), start, row - 1);
                }
                continue;
            }
            if run_start.is_none() && !self.is_comment_row(row, trimmed) {
                run_start = Some(row);
            }
        }

        if let Some(start) = run_start {
            self.emit(
                ChunkType::Statement,
                "code_block".into(),
                start,
                self.lines.len() - 1,
            );
        }
    }

    fn emit(&mut self, chunk_type: ChunkType, name: String, start_row: usize, end_row: usize) {
        let Some(last_row) = self.lines.len().checked_sub(1) else {
            return;
        };
        let end_row = end_row.min(last_row);
        if start_row > end_row {
            return;
        }

        let content = self.lines[start_row..=end_row].join("\n");
        self.claimed.extend(start_row..=end_row);
        self.chunks.push(Chunk {
            file_path: self.file_path.to_owned(),
            content_hash: content_hash(&content),
            content,
            chunk_type,
            name,
            start_line: start_row + 1,
            end_line: end_row + 1,
        });
    }

    /// 0-based inclusive rows. A node ending at column 0 stops on the previous row.
    fn row_span(&self, node: Node<'_>) -> (usize, usize) {
        let start = node.start_position().row;
        let end = node.end_position();
        let end_row = if end.column == 0 && end.row > start {
            end.row - 1
        } else {
            end.row
        };
        (start, end_row)
    }

    fn is_complete(&self, node: Node<'_>) -> bool {
        !self.lang.requires_body(node.kind()) || node.child_by_field_name("body").is_some()
    }

    fn attached_prefix_start(&self, node: Node<'_>) -> Option<usize> {
        let prefix_kinds = self.lang.attached_prefix_kinds();
        let mut start = None;
        let mut current = node.prev_named_sibling();
        while let Some(sibling) = current {
            if !prefix_kinds.contains(&sibling.kind()) {
                break;
            }
            start = Some(sibling.start_position().row);
            current = sibling.prev_named_sibling();
        }
        start
    }

    fn wrapped_definition<'t>(&self, wrapper: Node<'t>) -> Option<(Node<'t>, ChunkType)> {
        let mut cursor = wrapper.walk();
        wrapper
            .named_children(&mut cursor)
            .find_map(|child| match self.lang.classify(child.kind()) {
                Some(NodeClass::Definition(chunk_type)) if self.is_complete(child) => {
                    Some((child, chunk_type))
                }
                _ => None,
            })
    }

    fn definition_name(&self, node: Node<'_>) -> String {
        self.find_name(node)
            .or_else(|| typedef_alias(node))
            .map_or_else(|| "unnamed".to_owned(), |n| self.text(n).to_owned())
    }

    fn find_name<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        if let Some(name) = node.child_by_field_name("name") {
            return Some(name);
        }

        if let Some(name) = declarator_name(node) {
            return Some(name);
        }

        // Rust impl blocks are named after the implementing type.
        if let Some(ty) = node.child_by_field_name("type") {
            return Some(ty);
        }

        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        children
            .iter()
            .copied()
            .find(|child| is_identifier_kind(child.kind()))
            .or_else(|| {
                children
                    .iter()
                    .find_map(|child| child.child_by_field_name("name"))
            })
    }

    fn text(&self, node: Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }
}

/// C and C++ keep the name at the end of a declarator chain.
fn declarator_name(node: Node<'_>) -> Option<Node<'_>> {
    let mut declarator = node.child_by_field_name("declarator");
    while let Some(decl) = declarator {
        if is_identifier_kind(decl.kind()) {
            return Some(decl);
        }
        declarator = decl
            .child_by_field_name("declarator")
            .or_else(|| decl.child_by_field_name("name"));
    }
    None
}

/// `typedef struct { .. } Alias;` names the anonymous type after its alias.
fn typedef_alias(node: Node<'_>) -> Option<Node<'_>> {
    node.parent()
        .filter(|parent| parent.kind() == "type_definition")
        .and_then(declarator_name)
}

fn is_identifier_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "type_identifier"
            | "field_identifier"
            | "property_identifier"
            | "qualified_identifier"
            | "destructor_name"
            | "operator_name"
    )
}
