//! Lightweight declaration parser for Go test files.
//!
//! This is not a Go parser. It scans source text line by line and extracts
//! exactly three facts:
//! - the package name (first `package` statement wins)
//! - the import table (single-line imports and parenthesized blocks)
//! - suite-style test declarations whose argument type resolves, through the
//!   live import table, to a supported test library
//!
//! Everything is a pure function over `&[&str]`; there is no I/O here.
//!
//! ## Alias resolution
//!
//! A declaration `func (s *S) TestX(c *pkg.C) {` is resolved by looking up
//! `pkg` in the import table:
//!
//! 1. Exactly one import aliased `pkg`: the library is whatever that import's
//!    module path denotes (unknown modules are skipped).
//! 2. More than one import aliased `pkg`: the file is ambiguous and the whole
//!    parse yields no declarations.
//! 3. No alias matches: `pkg` may be a library's default short name, accepted
//!    only when that library's module is imported without an alias.
//!
//! The library kind always comes from the resolved module path, never from the
//! text of `pkg`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::library::TestLibrary;

// ============================================================================
// Patterns
// ============================================================================

static PACKAGE_STMT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*package\s+([A-Za-z_]\w*)\s*(?://.*)?$").unwrap());

static SINGLE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import\s+(?:([A-Za-z_]\w*|\.)\s+)?"([^"]+)"\s*(?://.*)?$"#).unwrap()
});

static IMPORT_BLOCK_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s*\(\s*(?://.*)?$").unwrap());

static IMPORT_BLOCK_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:([A-Za-z_]\w*|\.)\s+)?"([^"]+)"\s*(?://.*)?$"#).unwrap()
});

/// `func (recv *Type) TestName(arg *pkg.Type) {`, receiver optional.
static TEST_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\s*func\s*",
        r"(?:\(\s*(?:[A-Za-z_]\w*\s+)?\*?\s*([A-Za-z_]\w*)\s*\)\s*)?",
        r"(Test\w*)\s*",
        r"\(\s*(?:[A-Za-z_]\w*\s+)?\*?\s*(?:([A-Za-z_]\w*)\.)?([A-Za-z_]\w*)\s*\)",
        r"\s*\{",
    ))
    .unwrap()
});

// ============================================================================
// Data Types
// ============================================================================

/// Zero-based line/column position. Columns are byte offsets into the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

/// Half-open source range used for editor navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    /// Range covering `start..end` on a single line.
    pub fn on_line(line: usize, start: usize, end: usize) -> Self {
        SourceRange {
            start: Position {
                line,
                character: start,
            },
            end: Position {
                line,
                character: end,
            },
        }
    }
}

/// The package statement of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub line_number: usize,
}

/// One import table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    /// Module path, e.g. `gopkg.in/check.v1`.
    pub module: String,
    /// Explicit local alias (`q "..."`, `_ "..."`, `. "..."`).
    pub alias: Option<String>,
    pub line_number: usize,
}

/// The import an argument type was resolved through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportRef {
    pub module: String,
    pub local_name: String,
}

/// A suite-style test declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Declaration {
    pub library: TestLibrary,
    pub receiver_type: Option<String>,
    pub function_name: String,
    pub arg_library_ref: Option<ImportRef>,
    pub range: SourceRange,
    pub line_number: usize,
}

impl Declaration {
    /// `Receiver.Function`, or the bare function name without a receiver.
    pub fn qualified_name(&self) -> String {
        match &self.receiver_type {
            Some(receiver) => format!("{}.{}", receiver, self.function_name),
            None => self.function_name.clone(),
        }
    }
}

/// Everything the parser extracts from one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub package: PackageInfo,
    pub imports: Vec<Import>,
    pub test_functions: Vec<Declaration>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Split content into lines, accepting both `\n` and `\r\n`.
pub fn split_lines(content: &str) -> Vec<&str> {
    content.lines().collect()
}

/// Find the first package statement.
pub fn parse_package_name(lines: &[&str]) -> Option<PackageInfo> {
    lines.iter().enumerate().find_map(|(line_number, line)| {
        PACKAGE_STMT.captures(line).map(|caps| PackageInfo {
            name: caps[1].to_string(),
            line_number,
        })
    })
}

/// Parse the import table starting at `from_line`.
///
/// Entries keep source order. A parenthesized block that contains a line that
/// is not an import spec, or that is never closed, contributes nothing.
pub fn parse_imports(lines: &[&str], from_line: usize) -> Vec<Import> {
    let mut imports = Vec::new();
    let mut i = from_line;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = SINGLE_IMPORT.captures(line) {
            imports.push(Import {
                module: caps[2].to_string(),
                alias: caps.get(1).map(|m| m.as_str().to_string()),
                line_number: i,
            });
            i += 1;
            continue;
        }

        if IMPORT_BLOCK_OPEN.is_match(line) {
            let (block, next) = parse_import_block(lines, i + 1);
            imports.extend(block);
            i = next;
            continue;
        }

        i += 1;
    }

    imports
}

/// Parse the body of an import block. Returns the entries (empty when the
/// block is malformed or unterminated) and the index to resume scanning at.
fn parse_import_block(lines: &[&str], start: usize) -> (Vec<Import>, usize) {
    let mut entries = Vec::new();
    let mut malformed = false;

    for (i, line) in lines.iter().enumerate().skip(start) {
        let trimmed = line.trim();
        if trimmed == ")" {
            if malformed {
                debug!(line = start, "skipping malformed import block");
                entries.clear();
            }
            return (entries, i + 1);
        }
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        match IMPORT_BLOCK_ENTRY.captures(line) {
            Some(caps) => entries.push(Import {
                module: caps[2].to_string(),
                alias: caps.get(1).map(|m| m.as_str().to_string()),
                line_number: i,
            }),
            None => malformed = true,
        }
    }

    debug!(line = start, "import block is never closed");
    (Vec::new(), lines.len())
}

/// Outcome of resolving an argument's package qualifier.
enum Resolution {
    Library(TestLibrary, ImportRef),
    Unknown,
    Ambiguous,
}

fn resolve_qualifier(imports: &[Import], qualifier: &str) -> Resolution {
    let mut aliased = imports
        .iter()
        .filter(|imp| imp.alias.as_deref() == Some(qualifier));

    if let Some(import) = aliased.next() {
        if aliased.next().is_some() {
            return Resolution::Ambiguous;
        }
        return match TestLibrary::from_module(&import.module) {
            Some(library) => Resolution::Library(
                library,
                ImportRef {
                    module: import.module.clone(),
                    local_name: qualifier.to_string(),
                },
            ),
            None => Resolution::Unknown,
        };
    }

    let Some(library) = TestLibrary::from_default_name(qualifier) else {
        return Resolution::Unknown;
    };
    let module = library.profile().module_path;
    let imported = imports
        .iter()
        .any(|imp| imp.alias.is_none() && imp.module == module);
    if imported {
        Resolution::Library(
            library,
            ImportRef {
                module: module.to_string(),
                local_name: qualifier.to_string(),
            },
        )
    } else {
        Resolution::Unknown
    }
}

/// Extract suite-style test declarations starting at `from_line`.
///
/// Returns an empty sequence for the whole file as soon as one declaration's
/// qualifier is bound by more than one import alias.
pub fn parse_test_functions(imports: &[Import], lines: &[&str], from_line: usize) -> Vec<Declaration> {
    let mut declarations = Vec::new();

    for (line_number, line) in lines.iter().enumerate().skip(from_line) {
        let Some(caps) = TEST_FUNC.captures(line) else {
            continue;
        };
        let Some(qualifier) = caps.get(3) else {
            continue;
        };

        let (library, import_ref) = match resolve_qualifier(imports, qualifier.as_str()) {
            Resolution::Library(library, import_ref) => (library, import_ref),
            Resolution::Unknown => continue,
            Resolution::Ambiguous => {
                debug!(
                    alias = qualifier.as_str(),
                    line = line_number,
                    "import alias bound more than once, ignoring file"
                );
                return Vec::new();
            }
        };

        let start = line.find("func").unwrap_or(0);
        declarations.push(Declaration {
            library,
            receiver_type: caps.get(1).map(|m| m.as_str().to_string()),
            function_name: caps[2].to_string(),
            arg_library_ref: Some(import_ref),
            range: SourceRange::on_line(line_number, start, line.len()),
            line_number,
        });
    }

    declarations
}

/// Parse a whole file. Absent when there is no package statement.
pub fn parse(lines: &[&str]) -> Option<ParsedFile> {
    let package = parse_package_name(lines)?;
    let from_line = package.line_number + 1;
    let imports = parse_imports(lines, from_line);
    let test_functions = parse_test_functions(&imports, lines, from_line);
    Some(ParsedFile {
        package,
        imports,
        test_functions,
    })
}

/// Convenience wrapper over [`parse`] for raw content.
pub fn parse_source(content: &str) -> Option<ParsedFile> {
    parse(&split_lines(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOCHECK: &str = "gopkg.in/check.v1";
    const QUICKTEST: &str = "github.com/frankban/quicktest";

    fn lines(src: &str) -> Vec<&str> {
        split_lines(src)
    }

    // ------------------------------------------------------------------------
    // Package statements
    // ------------------------------------------------------------------------

    #[test]
    fn test_package_empty_input() {
        assert_eq!(parse_package_name(&[]), None);
        assert_eq!(parse(&[]), None);
        assert_eq!(parse_source(""), None);
    }

    #[test]
    fn test_package_missing() {
        let src = lines("import \"fmt\"\nfunc (s *S) TestA(c *check.C) {}");
        assert_eq!(parse_package_name(&src), None);
        assert_eq!(parse(&src), None);
    }

    #[test]
    fn test_package_first_wins() {
        let src = lines("// header\npackage first\n\npackage second\n");
        let info = parse_package_name(&src).unwrap();
        assert_eq!(info.name, "first");
        assert_eq!(info.line_number, 1);
    }

    #[test]
    fn test_package_with_trailing_comment() {
        let src = lines("package foo_test // import \"x\"");
        assert_eq!(parse_package_name(&src).unwrap().name, "foo_test");
    }

    // ------------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------------

    #[test]
    fn test_imports_empty() {
        assert!(parse_imports(&[], 0).is_empty());
        assert!(parse_test_functions(&[], &[], 0).is_empty());
    }

    #[test]
    fn test_imports_single_and_block() {
        let src = lines(concat!(
            "package p\n",
            "import \"fmt\"\n",
            "import q \"github.com/frankban/quicktest\"\n",
            "import (\n",
            "\t\"os\"\n",
            "\n",
            "\t// the suite library\n",
            "\tcheck \"gopkg.in/check.v1\" // trailing\n",
            "\t_ \"embed\"\n",
            "\t. \"strings\"\n",
            ")\n",
        ));
        let imports = parse_imports(&src, 1);
        let summary: Vec<(&str, Option<&str>, usize)> = imports
            .iter()
            .map(|i| (i.module.as_str(), i.alias.as_deref(), i.line_number))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("fmt", None, 1),
                (QUICKTEST, Some("q"), 2),
                ("os", None, 4),
                (GOCHECK, Some("check"), 7),
                ("embed", Some("_"), 8),
                ("strings", Some("."), 9),
            ]
        );
    }

    #[test]
    fn test_imports_unterminated_block() {
        let src = lines("package p\nimport (\n\t\"os\"\n\t\"fmt\"\n");
        assert!(parse_imports(&src, 1).is_empty());
    }

    #[test]
    fn test_imports_malformed_block_contributes_nothing() {
        let src = lines(concat!(
            "package p\n",
            "import (\n",
            "\t\"os\"\n",
            "\tnot an import\n",
            ")\n",
            "import \"fmt\"\n",
        ));
        let imports = parse_imports(&src, 1);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].module, "fmt");
    }

    #[test]
    fn test_imports_duplicates_are_kept() {
        let src = lines(concat!(
            "package p\n",
            "import x \"gopkg.in/check.v1\"\n",
            "import x \"github.com/frankban/quicktest\"\n",
        ));
        let imports = parse_imports(&src, 1);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].module, GOCHECK);
        assert_eq!(imports[1].module, QUICKTEST);
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    #[test]
    fn test_scenario_default_gocheck_name() {
        let parsed =
            parse_source("package p\nimport \"gopkg.in/check.v1\"\nfunc (s *Suite) TestX(c *check.C) {}")
                .unwrap();
        assert_eq!(parsed.test_functions.len(), 1);
        let decl = &parsed.test_functions[0];
        assert_eq!(decl.library, TestLibrary::Gocheck);
        assert_eq!(decl.receiver_type.as_deref(), Some("Suite"));
        assert_eq!(decl.function_name, "TestX");
        assert_eq!(decl.line_number, 2);
        assert_eq!(decl.range, SourceRange::on_line(2, 0, 36));
        assert_eq!(
            decl.arg_library_ref,
            Some(ImportRef {
                module: GOCHECK.to_string(),
                local_name: "check".to_string(),
            })
        );
    }

    #[test]
    fn test_scenario_block_alias_resolves_by_module() {
        let src = concat!(
            "package p\n",
            "import (\n",
            "\tq \"github.com/frankban/quicktest\"\n",
            ")\n",
            "func (s *mySuite) TestY(c *q.C) {\n",
            "}\n",
        );
        let parsed = parse_source(src).unwrap();
        assert_eq!(parsed.test_functions.len(), 1);
        assert_eq!(parsed.test_functions[0].library, TestLibrary::Quicktest);
        assert_eq!(parsed.test_functions[0].function_name, "TestY");
    }

    #[test]
    fn test_swapped_aliases_swap_kinds() {
        let body = "func (s *S) TestA(c *a.C) {}\nfunc (s *S) TestB(c *b.C) {}\n";
        let first = format!(
            "package p\nimport (\n\ta \"{}\"\n\tb \"{}\"\n)\n{}",
            GOCHECK, QUICKTEST, body
        );
        let second = format!(
            "package p\nimport (\n\ta \"{}\"\n\tb \"{}\"\n)\n{}",
            QUICKTEST, GOCHECK, body
        );

        let kinds = |src: &str| -> Vec<TestLibrary> {
            parse_source(src)
                .unwrap()
                .test_functions
                .iter()
                .map(|d| d.library)
                .collect()
        };
        assert_eq!(kinds(&first), vec![TestLibrary::Gocheck, TestLibrary::Quicktest]);
        assert_eq!(kinds(&second), vec![TestLibrary::Quicktest, TestLibrary::Gocheck]);
    }

    #[test]
    fn test_duplicate_alias_aborts_whole_file() {
        let src = concat!(
            "package p\n",
            "import (\n",
            "\tcheck \"gopkg.in/check.v1\"\n",
            "\tx \"github.com/frankban/quicktest\"\n",
            "\tx \"github.com/other/quicktest\"\n",
            ")\n",
            "func (s *S) TestFine(c *check.C) {}\n",
            "func (s *S) TestAmbiguous(c *x.C) {}\n",
        );
        let parsed = parse_source(src).unwrap();
        assert_eq!(parsed.imports.len(), 3);
        assert!(parsed.test_functions.is_empty());
    }

    #[test]
    fn test_duplicate_alias_unused_is_harmless() {
        let src = concat!(
            "package p\n",
            "import x \"github.com/frankban/quicktest\"\n",
            "import x \"gopkg.in/check.v1\"\n",
            "import \"gopkg.in/check.v1\"\n",
            "func (s *S) TestFine(c *check.C) {}\n",
        );
        let parsed = parse_source(src).unwrap();
        assert_eq!(parsed.test_functions.len(), 1);
    }

    #[test]
    fn test_unqualified_argument_is_skipped() {
        let src = "package p\nimport \"gopkg.in/check.v1\"\nfunc (s *S) TestX(c *C) {}\n";
        assert!(parse_source(src).unwrap().test_functions.is_empty());
    }

    #[test]
    fn test_default_name_requires_unaliased_module() {
        // `check` names the default, but the module is only imported under an alias.
        let src = "package p\nimport gc \"gopkg.in/check.v1\"\nfunc (s *S) TestX(c *check.C) {}\n";
        assert!(parse_source(src).unwrap().test_functions.is_empty());

        // `check` names the default, but the unaliased import is a different module.
        let src = "package p\nimport \"example.com/check\"\nfunc (s *S) TestX(c *check.C) {}\n";
        assert!(parse_source(src).unwrap().test_functions.is_empty());
    }

    #[test]
    fn test_default_quicktest_name() {
        let src = "package p\nimport \"github.com/frankban/quicktest\"\nfunc (s *S) TestQ(c *qt.C) {}\n";
        let parsed = parse_source(src).unwrap();
        assert_eq!(parsed.test_functions[0].library, TestLibrary::Quicktest);
    }

    #[test]
    fn test_alias_to_unknown_module_is_skipped() {
        let src = "package p\nimport check \"testing\"\nfunc (s *S) TestX(c *check.C) {}\n";
        assert!(parse_source(src).unwrap().test_functions.is_empty());
    }

    #[test]
    fn test_non_test_methods_are_ignored() {
        let src = concat!(
            "package p\n",
            "import \"gopkg.in/check.v1\"\n",
            "func (s *S) SetUpTest(c *check.C) {}\n",
            "func (s *S) helper(c *check.C) {}\n",
            "func (s *S) TestReal(c *check.C) {\n",
        );
        let names: Vec<String> = parse_source(src)
            .unwrap()
            .test_functions
            .into_iter()
            .map(|d| d.function_name)
            .collect();
        assert_eq!(names, vec!["TestReal"]);
    }

    #[test]
    fn test_receiver_forms() {
        let src = concat!(
            "package p\n",
            "import \"gopkg.in/check.v1\"\n",
            "func (S) TestNoName(c *check.C) {}\n",
            "func (s S) TestValue(c *check.C) {}\n",
            "func TestPlain(c *check.C) {}\n",
        );
        let decls = parse_source(src).unwrap().test_functions;
        let receivers: Vec<Option<&str>> =
            decls.iter().map(|d| d.receiver_type.as_deref()).collect();
        assert_eq!(receivers, vec![Some("S"), Some("S"), None]);
        assert_eq!(decls[2].qualified_name(), "TestPlain");
        assert_eq!(decls[0].qualified_name(), "S.TestNoName");
    }

    #[test]
    fn test_declarations_before_package_are_ignored() {
        let src = concat!(
            "func (s *S) TestEarly(c *check.C) {}\n",
            "package p\n",
            "import \"gopkg.in/check.v1\"\n",
            "func (s *S) TestLate(c *check.C) {}\n",
        );
        let decls = parse_source(src).unwrap().test_functions;
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].function_name, "TestLate");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let src = concat!(
            "package p\n",
            "import (\n",
            "\tq \"github.com/frankban/quicktest\"\n",
            "\t\"gopkg.in/check.v1\"\n",
            ")\n",
            "func (s *A) TestOne(c *check.C) {}\n",
            "func (s *B) TestTwo(c *q.C) {}\n",
        );
        let first = parse_source(src).unwrap();
        let second = parse_source(src).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.test_functions).unwrap(),
            serde_json::to_vec(&second.test_functions).unwrap()
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let src = "package p\r\nimport \"gopkg.in/check.v1\"\r\nfunc (s *S) TestX(c *check.C) {}\r\n";
        let parsed = parse_source(src).unwrap();
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.test_functions.len(), 1);
    }
}
