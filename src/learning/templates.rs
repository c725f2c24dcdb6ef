//! Fixed failure-category registry
//!
//! Each category carries a regex, a keyword list, and default prevention
//! advice. Adding a category means adding an enum variant; the compiler then
//! points at every match that needs a new arm.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Failure categories known to the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CliError,
    StylingError,
    ImportError,
    TypeError,
    UnknownError,
}

impl ErrorCategory {
    /// Categories that have a template, in classification order
    pub const CLASSIFIABLE: [ErrorCategory; 4] = [
        ErrorCategory::CliError,
        ErrorCategory::StylingError,
        ErrorCategory::ImportError,
        ErrorCategory::TypeError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::CliError => "cli_error",
            ErrorCategory::StylingError => "styling_error",
            ErrorCategory::ImportError => "import_error",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::UnknownError => "unknown_error",
        }
    }

    /// Template for this category; `None` for the unknown sentinel
    pub fn template(&self) -> Option<&'static CategoryTemplate> {
        match self {
            ErrorCategory::CliError => Some(&CLI_TEMPLATE),
            ErrorCategory::StylingError => Some(&STYLING_TEMPLATE),
            ErrorCategory::ImportError => Some(&IMPORT_TEMPLATE),
            ErrorCategory::TypeError => Some(&TYPE_TEMPLATE),
            ErrorCategory::UnknownError => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Built-in definition for one category
pub struct CategoryTemplate {
    pub category: ErrorCategory,
    pub description: &'static str,
    pub regex: Lazy<Regex>,
    pub keywords: &'static [&'static str],
    pub prevention: &'static [&'static str],
}

impl CategoryTemplate {
    pub fn regex_matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Number of keywords present in `text` (case-insensitive substring)
    pub fn keyword_hits(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        self.keywords.iter().filter(|k| lower.contains(*k)).count()
    }

    /// Fraction of keywords present in `text`
    pub fn keyword_ratio(&self, text: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        self.keyword_hits(text) as f64 / self.keywords.len() as f64
    }

    pub fn prevention_rules(&self) -> Vec<String> {
        self.prevention.iter().map(|s| s.to_string()).collect()
    }
}

static CLI_TEMPLATE: CategoryTemplate = CategoryTemplate {
    category: ErrorCategory::CliError,
    description: "Command-line invocation failure",
    regex: Lazy::new(|| {
        Regex::new(
            r"(?i)(unrecognized arguments?|invalid choice|the following arguments are required|unknown (command|option|flag|subcommand)|unexpected argument|usage:)",
        )
        .expect("cli regex")
    }),
    keywords: &["argument", "command", "usage", "option", "invalid choice", "required", "unrecognized"],
    prevention: &[
        "Run the command with --help to confirm the accepted arguments",
        "Validate argument names and values before invoking the CLI",
        "Pass option values as --option=value",
    ],
};

static STYLING_TEMPLATE: CategoryTemplate = CategoryTemplate {
    category: ErrorCategory::StylingError,
    description: "Code style or formatting defect",
    regex: Lazy::new(|| {
        Regex::new(
            r"(?i)(line too long|trailing whitespace|indentation|\b[EW]\d{3}\b|would reformat|needs formatting)",
        )
        .expect("styling regex")
    }),
    keywords: &["style", "format", "whitespace", "indent", "line too long", "lint", "pep8"],
    prevention: &[
        "Run the project formatter before committing",
        "Enable the linter in a pre-commit hook",
        "Keep lines under the configured maximum length",
    ],
};

static IMPORT_TEMPLATE: CategoryTemplate = CategoryTemplate {
    category: ErrorCategory::ImportError,
    description: "Missing or unresolvable import",
    regex: Lazy::new(|| {
        Regex::new(
            r"(?i)(no module named|cannot import name|importerror|modulenotfounderror|unresolved import)",
        )
        .expect("import regex")
    }),
    keywords: &["import", "module", "package", "no module named", "installed"],
    prevention: &[
        "Check that the package is installed in the active environment",
        "Add the missing package to requirements.txt",
        "Verify the import path and module name spelling",
    ],
};

static TYPE_TEMPLATE: CategoryTemplate = CategoryTemplate {
    category: ErrorCategory::TypeError,
    description: "Type or attribute misuse",
    regex: Lazy::new(|| {
        Regex::new(
            r"(?i)(\btypeerror\b|attributeerror|has no attribute|is not callable|unsupported operand|mismatched types|'nonetype')",
        )
        .expect("type regex")
    }),
    keywords: &["type", "attribute", "none", "callable", "operand", "expected"],
    prevention: &[
        "Add type annotations and run a type checker",
        "Guard against None before attribute access",
        "Validate argument types at function boundaries",
    ],
};

/// Advice returned when a signal fits no category
pub const GENERIC_SUGGESTION: &str =
    "Unrecognised failure: inspect the full message and traceback, then add a regression test";

/// Pick a category for a signal that matched no learned pattern.
///
/// Regex hits win over keyword overlap, templates are scanned in
/// `ErrorCategory::CLASSIFIABLE` order, and substring heuristics are the last
/// resort before `UnknownError`.
pub fn classify_text(text: &str) -> ErrorCategory {
    for category in ErrorCategory::CLASSIFIABLE {
        if let Some(template) = category.template() {
            if template.regex_matches(text) {
                return category;
            }
        }
    }

    for category in ErrorCategory::CLASSIFIABLE {
        if let Some(template) = category.template() {
            if template.keyword_ratio(text) >= 0.5 {
                return category;
            }
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("import") {
        ErrorCategory::ImportError
    } else if lower.contains("cli") || lower.contains("command") || lower.contains("argument") {
        ErrorCategory::CliError
    } else if lower.contains("style") || lower.contains("format") {
        ErrorCategory::StylingError
    } else if lower.contains("type") || lower.contains("attribute") {
        ErrorCategory::TypeError
    } else {
        ErrorCategory::UnknownError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_classification() {
        assert_eq!(classify_text("ImportError No module named 'foo'"), ErrorCategory::ImportError);
        assert_eq!(classify_text("error: unrecognized arguments: --fast"), ErrorCategory::CliError);
        assert_eq!(classify_text("E501 line too long (120 > 100)"), ErrorCategory::StylingError);
        assert_eq!(
            classify_text("AttributeError: 'NoneType' object has no attribute 'x'"),
            ErrorCategory::TypeError
        );
    }

    #[test]
    fn test_import_error_is_not_type_error() {
        // "importerror" must not trip the type regex
        assert!(!ErrorCategory::TypeError.template().unwrap().regex_matches("ImportError"));
    }

    #[test]
    fn test_substring_fallback() {
        assert_eq!(classify_text("the command exploded"), ErrorCategory::CliError);
        assert_eq!(classify_text("bad format here"), ErrorCategory::StylingError);
        assert_eq!(classify_text("wrong type given"), ErrorCategory::TypeError);
        assert_eq!(classify_text("segmentation fault"), ErrorCategory::UnknownError);
    }

    #[test]
    fn test_keyword_ratio() {
        let template = ErrorCategory::ImportError.template().unwrap();
        assert_eq!(template.keyword_ratio("nothing relevant"), 0.0);
        assert!(template.keyword_ratio("IMPORT of MODULE from PACKAGE") >= 0.5);
    }

    #[test]
    fn test_unknown_has_no_template() {
        assert!(ErrorCategory::UnknownError.template().is_none());
        assert_eq!(ErrorCategory::UnknownError.to_string(), "unknown_error");
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&ErrorCategory::StylingError).unwrap();
        assert_eq!(json, "\"styling_error\"");
    }
}
