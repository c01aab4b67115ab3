use crate::error::{ChunkerError, Result};
use std::path::Path;

/// A source language recognised for file-type classification. Only
/// [`Language::supports_ast`] languages get tree-sitter AST/CST extraction
/// (spec's C1 `ast_trees`/`cst_trees`/`entities` tables); the rest still get
/// a `code_content` row and file-level chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Swift,
    Kotlin,
    Markdown,
    Yaml,
    Json,
    Config,
    Sql,
    Shell,
    Terraform,
    Html,
    Css,
    Unknown,
}

/// Everything about a language that can be expressed as plain data rather
/// than control flow: which extensions/filenames name it, and which
/// comment/import lexical markers the chunker uses for heuristic splitting.
/// Tree-sitter grammars aren't data (they're constructed from crate-level
/// functions), so `tree_sitter_language` stays a match below this table.
struct LanguageEntry {
    lang: Language,
    name: &'static str,
    extensions: &'static [&'static str],
    filenames: &'static [&'static str],
    ast: bool,
    comment_prefixes: &'static [&'static str],
    import_patterns: &'static [&'static str],
}

const TABLE: &[LanguageEntry] = &[
    LanguageEntry {
        lang: Language::Rust,
        name: "rust",
        extensions: &["rs"],
        filenames: &[],
        ast: true,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["use ", "extern crate "],
    },
    LanguageEntry {
        lang: Language::Python,
        name: "python",
        extensions: &["py", "pyw"],
        filenames: &[],
        ast: true,
        comment_prefixes: &["#", "\"\"\"", "'''"],
        import_patterns: &["import ", "from "],
    },
    LanguageEntry {
        lang: Language::JavaScript,
        name: "javascript",
        extensions: &["js", "mjs", "cjs"],
        filenames: &[],
        ast: true,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import ", "require("],
    },
    LanguageEntry {
        lang: Language::TypeScript,
        name: "typescript",
        extensions: &["ts", "tsx"],
        filenames: &[],
        ast: true,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import ", "require("],
    },
    LanguageEntry {
        lang: Language::Go,
        name: "go",
        extensions: &["go"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import "],
    },
    LanguageEntry {
        lang: Language::Java,
        name: "java",
        extensions: &["java"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import "],
    },
    LanguageEntry {
        lang: Language::C,
        name: "c",
        extensions: &["c", "h"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["#include "],
    },
    LanguageEntry {
        lang: Language::Cpp,
        name: "cpp",
        extensions: &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["#include "],
    },
    LanguageEntry {
        lang: Language::CSharp,
        name: "csharp",
        extensions: &["cs"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["using "],
    },
    LanguageEntry {
        lang: Language::Ruby,
        name: "ruby",
        extensions: &["rb"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["#", "\"\"\"", "'''"],
        import_patterns: &["require ", "include "],
    },
    LanguageEntry {
        lang: Language::Swift,
        name: "swift",
        extensions: &["swift"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import "],
    },
    LanguageEntry {
        lang: Language::Kotlin,
        name: "kotlin",
        extensions: &["kt", "kts"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//", "/*", "///", "/**"],
        import_patterns: &["import "],
    },
    LanguageEntry {
        lang: Language::Markdown,
        name: "markdown",
        extensions: &["md", "mdx", "rst", "adoc"],
        filenames: &[],
        ast: false,
        comment_prefixes: &[">", "#"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Yaml,
        name: "yaml",
        extensions: &["yaml", "yml"],
        filenames: &["docker-compose.yml"],
        ast: false,
        comment_prefixes: &["#"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Json,
        name: "json",
        extensions: &["json"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["//"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Config,
        name: "config",
        extensions: &[
            "toml",
            "ini",
            "cfg",
            "conf",
            "properties",
            "env",
            "gradle",
            "groovy",
        ],
        filenames: &[],
        ast: false,
        comment_prefixes: &["#"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Sql,
        name: "sql",
        extensions: &["sql", "dbml"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["--", "/*"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Shell,
        name: "shell",
        extensions: &["sh", "bash", "zsh", "fish", "ps1", "bat", "cmd"],
        filenames: &["Makefile", "makefile"],
        ast: false,
        comment_prefixes: &["#"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Terraform,
        name: "terraform",
        extensions: &["tf", "tfvars", "hcl"],
        filenames: &["Dockerfile"],
        ast: false,
        comment_prefixes: &["#", "//"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Html,
        name: "html",
        extensions: &["html"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["<!--", "/*"],
        import_patterns: &[],
    },
    LanguageEntry {
        lang: Language::Css,
        name: "css",
        extensions: &["css", "scss", "less"],
        filenames: &[],
        ast: false,
        comment_prefixes: &["<!--", "/*"],
        import_patterns: &[],
    },
];

fn entry_for(lang: Language) -> Option<&'static LanguageEntry> {
    TABLE.iter().find(|e| e.lang == lang)
}

impl Language {
    /// Look up the entry whose extension list contains `ext` (case-insensitive).
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        TABLE
            .iter()
            .find(|e| e.extensions.contains(&ext.as_str()))
            .map(|e| e.lang)
            .unwrap_or(Self::Unknown)
    }

    /// Extension wins when present; otherwise fall back to a whole-filename
    /// match for the extensionless files the table also carries
    /// (`Dockerfile`, `Makefile`, ...).
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let by_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown);
        if by_ext != Self::Unknown {
            return by_ext;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return Self::Unknown,
        };
        TABLE
            .iter()
            .find(|e| e.filenames.contains(&name))
            .map(|e| e.lang)
            .unwrap_or(Self::Unknown)
    }

    /// Stable lowercase name, used as the `language` column value and in
    /// error messages.
    pub fn as_str(self) -> &'static str {
        entry_for(self).map(|e| e.name).unwrap_or("unknown")
    }

    /// Whether the chunker routes this language through tree-sitter instead
    /// of the line-heuristic fallback path.
    pub fn supports_ast(self) -> bool {
        entry_for(self).is_some_and(|e| e.ast)
    }

    /// Construct the tree-sitter grammar for languages with AST support.
    /// Grammar handles aren't representable as `const` table data, so this
    /// stays its own match over the small AST-capable subset.
    pub fn tree_sitter_language(self) -> Result<tree_sitter::Language> {
        match self {
            Self::Rust => Ok(tree_sitter_rust::LANGUAGE.into()),
            Self::Python => Ok(tree_sitter_python::LANGUAGE.into()),
            Self::JavaScript => Ok(tree_sitter_javascript::LANGUAGE.into()),
            Self::TypeScript => Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            _ => Err(ChunkerError::unsupported_language(self.as_str())),
        }
    }

    /// Lexical markers the line-heuristic chunker treats as comment openers.
    pub fn comment_prefixes(self) -> Vec<&'static str> {
        entry_for(self)
            .map(|e| e.comment_prefixes.to_vec())
            .unwrap_or_default()
    }

    /// Lexical markers the line-heuristic chunker treats as import/use
    /// statements, for [`crate::contextual_imports`].
    pub fn import_patterns(self) -> Vec<&'static str> {
        entry_for(self)
            .map(|e| e.import_patterns.to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Language;

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(Language::from_extension("rs"), Language::Rust);
        assert_eq!(Language::from_extension("RS"), Language::Rust);
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("toml"), Language::Config);
        assert_eq!(Language::from_extension("made_up"), Language::Unknown);
    }

    #[test]
    fn path_lookup_falls_back_to_bare_filenames() {
        assert_eq!(Language::from_path("src/main.rs"), Language::Rust);
        assert_eq!(Language::from_path("README.md"), Language::Markdown);
        assert_eq!(Language::from_path("Dockerfile"), Language::Terraform);
        assert_eq!(Language::from_path("Makefile"), Language::Shell);
        assert_eq!(Language::from_path("no_extension_or_known_name"), Language::Unknown);
    }

    #[test]
    fn ast_support_matches_the_table() {
        for lang in [Language::Rust, Language::Python, Language::JavaScript, Language::TypeScript] {
            assert!(lang.supports_ast());
            assert!(lang.tree_sitter_language().is_ok());
        }
        for lang in [Language::Go, Language::Unknown] {
            assert!(!lang.supports_ast());
            assert!(lang.tree_sitter_language().is_err());
        }
    }

    #[test]
    fn comment_and_import_markers_are_populated_for_common_languages() {
        assert!(Language::Rust.comment_prefixes().contains(&"//"));
        assert!(Language::Python.comment_prefixes().contains(&"#"));
        assert!(Language::Unknown.comment_prefixes().is_empty());

        assert!(Language::Rust.import_patterns().contains(&"use "));
        assert!(Language::Python.import_patterns().contains(&"import "));
        assert!(Language::Json.import_patterns().is_empty());
    }
}
