//! Language detection, tree-sitter grammar registry and node classification tables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkType;

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Java,
    C,
    Cpp,
    Rust,
    Go,
}

/// How the extractor treats a syntax node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// A definition emitted as a chunk of the given type.
    Definition(ChunkType),
    /// A wrapper carrying decorators, annotations or template parameters around
    /// a definition; emitted as one chunk in place of the wrapped definition.
    Decorated,
}

impl Lang {
    /// Identifier used in logs and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-java")]
            Self::Java => Some(tree_sitter_java::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Top-level node kinds gathered into the single import chunk.
    #[must_use]
    pub fn import_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python => &[
                "import_statement",
                "import_from_statement",
                "future_import_statement",
            ],
            Self::JavaScript | Self::TypeScript => &["import_statement"],
            Self::Java => &["import_declaration"],
            Self::C | Self::Cpp => &["preproc_include"],
            Self::Rust => &["use_declaration", "extern_crate_declaration"],
            Self::Go => &["import_declaration"],
        }
    }

    /// Classify a node kind. `None` means "not a chunk boundary, keep descending".
    #[must_use]
    pub fn classify(self, kind: &str) -> Option<NodeClass> {
        use ChunkType::{ClassDef, FunctionDef};
        use NodeClass::{Decorated, Definition};

        let class = match (self, kind) {
            (Self::Python, "function_definition") => Definition(FunctionDef),
            (Self::Python, "class_definition") => Definition(ClassDef),
            (Self::Python, "decorated_definition") => Decorated,

            (
                Self::JavaScript | Self::TypeScript,
                "function_declaration" | "generator_function_declaration" | "method_definition",
            ) => Definition(FunctionDef),
            (Self::JavaScript | Self::TypeScript, "class_declaration" | "class") => {
                Definition(ClassDef)
            }
            (
                Self::TypeScript,
                "abstract_class_declaration" | "interface_declaration" | "enum_declaration",
            ) => Definition(ClassDef),

            (Self::Java, "method_declaration" | "constructor_declaration") => {
                Definition(FunctionDef)
            }
            (
                Self::Java,
                "class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration"
                | "annotation_type_declaration",
            ) => Definition(ClassDef),

            (Self::C | Self::Cpp, "function_definition") => Definition(FunctionDef),
            (Self::C | Self::Cpp, "struct_specifier" | "union_specifier" | "enum_specifier") => {
                Definition(ClassDef)
            }
            (Self::Cpp, "class_specifier") => Definition(ClassDef),
            (Self::Cpp, "template_declaration") => Decorated,

            (Self::Rust, "function_item") => Definition(FunctionDef),
            (
                Self::Rust,
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "impl_item",
            ) => Definition(ClassDef),

            (Self::Go, "function_declaration" | "method_declaration") => Definition(FunctionDef),
            (Self::Go, "type_declaration") => Definition(ClassDef),

            _ => return None,
        };
        Some(class)
    }

    /// Definition kinds that are only definitions when they carry a body;
    /// without one they are forward declarations or type references.
    #[must_use]
    pub fn requires_body(self, kind: &str) -> bool {
        matches!(self, Self::C | Self::Cpp)
            && matches!(
                kind,
                "struct_specifier" | "union_specifier" | "enum_specifier" | "class_specifier"
            )
    }

    /// Sibling node kinds physically attached to the definition that follows them.
    #[must_use]
    pub fn attached_prefix_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["attribute_item"],
            _ => &[],
        }
    }

    /// Grammar node kinds for comments.
    #[must_use]
    pub fn comment_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Java | Self::Rust => &["line_comment", "block_comment"],
            _ => &["comment"],
        }
    }

    /// Whether a trimmed, non-empty line holds nothing but a comment.
    #[must_use]
    pub fn is_comment_only(self, trimmed: &str) -> bool {
        match self {
            Self::Python => trimmed.starts_with('#'),
            _ => {
                if trimmed.starts_with("//") {
                    return true;
                }
                trimmed
                    .strip_prefix("/*")
                    .is_some_and(|rest| match rest.find("*/") {
                        Some(end) => rest[end + 2..].trim().is_empty(),
                        None => true,
                    })
            }
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "java" => Some(Lang::Java),
        "c" | "h" => Some(Lang::C),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(Lang::Cpp),
        "rs" => Some(Lang::Rust),
        "go" => Some(Lang::Go),
        _ => None,
    }
}
