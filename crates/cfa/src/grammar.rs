//! Isolates the tree-sitter grammar-loading calls. The exact shape of this
//! call (a plain `fn language() -> Language` versus a `LanguageFn` constant
//! requiring `.into()`) has changed across tree-sitter releases; keeping it
//! in one place means a future grammar bump only touches this file.

use tree_sitter::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    TypeScript,
    Tsx,
    JavaScript,
}

impl SourceLanguage {
    /// Picks a grammar from a file extension. Unknown extensions fall back
    /// to plain TypeScript, which parses a JavaScript superset well enough
    /// for CFG purposes.
    pub fn from_path(path: &str) -> Self {
        match path.rsplit('.').next().unwrap_or("") {
            "tsx" => SourceLanguage::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => SourceLanguage::JavaScript,
            _ => SourceLanguage::TypeScript,
        }
    }

    pub fn load(self) -> Language {
        match self {
            SourceLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SourceLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SourceLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

pub fn parser_for(language: SourceLanguage) -> anyhow::Result<tree_sitter::Parser> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&language.load())?;
    Ok(parser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_selects_expected_grammar() {
        assert_eq!(SourceLanguage::from_path("src/app.tsx"), SourceLanguage::Tsx);
        assert_eq!(SourceLanguage::from_path("src/app.ts"), SourceLanguage::TypeScript);
        assert_eq!(SourceLanguage::from_path("src/app.js"), SourceLanguage::JavaScript);
        assert_eq!(SourceLanguage::from_path("src/app"), SourceLanguage::TypeScript);
    }

    #[test]
    fn each_grammar_loads_a_parser() {
        assert!(parser_for(SourceLanguage::TypeScript).is_ok());
        assert!(parser_for(SourceLanguage::Tsx).is_ok());
        assert!(parser_for(SourceLanguage::JavaScript).is_ok());
    }
}
