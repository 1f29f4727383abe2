//! ErrorAnalyzer - turns raw command output into a structured ErrorAnalysis
//!
//! The offending file is taken from the invoking command when one of its
//! arguments names a file that exists, since terminal wrapping can corrupt
//! paths inside stack traces. Only then is the error text searched, first as
//! printed and then with wrapped lines rejoined.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::{ErrorAnalysis, ErrorKind};
use crate::exec::CommandOutput;

const MAX_MESSAGE_CHARS: usize = 240;
const MAX_QUERY_CHARS: usize = 120;

static CLASSIFIERS: LazyLock<Vec<(ErrorKind, Regex)>> = LazyLock::new(|| {
    [
        (
            ErrorKind::Syntax,
            r"(?i)(SyntaxError|syntax error|ParseError|parse error|unexpected token|unexpected end of|unterminated|expected expression)",
        ),
        (
            ErrorKind::MissingDependency,
            r"(?i)(cannot find module|module not found|ModuleNotFoundError|no module named|unresolved import|could not resolve|command not found|ImportError)",
        ),
        (
            ErrorKind::Type,
            r"(?i)(TypeError|mismatched types|is not assignable to|type mismatch|is not a function|error\[E0308\])",
        ),
        (
            ErrorKind::AssertionFailure,
            r"(?i)(AssertionError|assertion failed|assertion `|expected .+ (to|but)|test result: FAILED|tests? failed)",
        ),
        (ErrorKind::Timeout, r"(?i)(timed out|ETIMEDOUT|timeout exceeded)"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("classifier regex is valid")))
    .collect()
});

/// `path/to/file.ext:line[:column]`
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<path>(?:[A-Za-z]:)?[\w./\\-]*[\w-]\.[A-Za-z][A-Za-z0-9]*):(?P<line>\d+)(?::(?P<col>\d+))?")
        .expect("location regex is valid")
});

/// Python traceback style: `File "path", line N`
static PY_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "(?P<path>[^"]+)", line (?P<line>\d+)"#).expect("traceback regex is valid"));

static LINE_COL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(\d+):(\d+)").expect("line/col regex is valid"));

/// Classifies failed command output
pub trait ErrorAnalyzer: Send + Sync {
    fn analyze(&self, output: &CommandOutput, command: &str, cwd: &Path) -> ErrorAnalysis;
}

/// Regex-driven analyzer over the closed ErrorKind set
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAnalyzer;

impl ErrorAnalyzer for PatternAnalyzer {
    fn analyze(&self, output: &CommandOutput, command: &str, cwd: &Path) -> ErrorAnalysis {
        debug!(%command, exit_code = output.exit_code, timed_out = output.timed_out, "PatternAnalyzer::analyze: called");
        let text = output.combined();

        let kind = if output.timed_out {
            ErrorKind::Timeout
        } else {
            classify(&text)
        };
        let message = pick_message(&text, kind, output.exit_code);

        let (file, line, column) = match file_from_command(command, cwd) {
            Some(file) => {
                let (line, column) = location_for(&text, &file, cwd).unwrap_or_else(|| first_line_col(&text));
                (Some(file), line, column)
            }
            None => match file_from_text(&text, cwd) {
                Some((file, line, column)) => (Some(file), line, column),
                None => (None, None, None),
            },
        };

        let search_query = truncate(&format!("{} {}", kind, message), MAX_QUERY_CHARS);
        let analysis = ErrorAnalysis {
            kind,
            file,
            line,
            column,
            message,
            search_query,
        };
        debug!(summary = %analysis.summary(), "PatternAnalyzer::analyze: complete");
        analysis
    }
}

fn classify(text: &str) -> ErrorKind {
    CLASSIFIERS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

fn pick_message(text: &str, kind: ErrorKind, exit_code: i32) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let matching = CLASSIFIERS
        .iter()
        .find(|(k, _)| *k == kind)
        .and_then(|(_, re)| lines.iter().find(|l| re.is_match(l)));

    match matching.or_else(|| lines.first()) {
        Some(line) => truncate(line, MAX_MESSAGE_CHARS),
        None => format!("command exited with code {}", exit_code),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn resolve(cwd: &Path, candidate: &str) -> PathBuf {
    let path = Path::new(candidate);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// First command argument that names an existing file
fn file_from_command(command: &str, cwd: &Path) -> Option<PathBuf> {
    command
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, '\'' | '"' | '`' | ';' | '(' | ')' | ',')))
        .filter(|t| !t.is_empty() && !t.starts_with('-') && (t.contains('.') || t.contains('/')))
        .map(|t| resolve(cwd, t))
        .find(|p| p.is_file())
}

type Location = (PathBuf, Option<u32>, Option<u32>);

fn locations<'a>(text: &'a str, cwd: &'a Path) -> impl Iterator<Item = Location> + 'a {
    let plain = LOCATION.captures_iter(text).map(move |c| {
        (
            resolve(cwd, &c["path"]),
            c["line"].parse().ok(),
            c.name("col").and_then(|m| m.as_str().parse().ok()),
        )
    });
    let traceback = PY_LOCATION
        .captures_iter(text)
        .map(move |c| (resolve(cwd, &c["path"]), c["line"].parse().ok(), None));
    plain.chain(traceback)
}

/// First existing file named in the error text, trying wrapped lines rejoined second
fn file_from_text(text: &str, cwd: &Path) -> Option<Location> {
    if let Some(found) = locations(text, cwd).find(|(p, _, _)| p.is_file()) {
        return Some(found);
    }
    let rejoined: String = text.lines().map(str::trim_end).collect();
    let found = locations(&rejoined, cwd).find(|(p, _, _)| p.is_file());
    debug!(found = found.is_some(), "file_from_text: tried rejoined text");
    found
}

/// Line/column the error text reports for `file`
fn location_for(text: &str, file: &Path, cwd: &Path) -> Option<(Option<u32>, Option<u32>)> {
    let name = file.file_name()?;
    locations(text, cwd)
        .find(|(p, _, _)| p == file || p.file_name() == Some(name))
        .map(|(_, line, col)| (line, col))
}

fn first_line_col(text: &str) -> (Option<u32>, Option<u32>) {
    LINE_COL
        .captures(text)
        .map(|c| (c[1].parse().ok(), c[2].parse().ok()))
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            stderr: stderr.to_string(),
            exit_code: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_classification_closed_set() {
        let cases = [
            ("SyntaxError: Unexpected token ';'", ErrorKind::Syntax),
            ("TypeError: x is not a function", ErrorKind::Type),
            ("Error: Cannot find module 'left-pad'", ErrorKind::MissingDependency),
            ("AssertionError: expected 1 to equal 2", ErrorKind::AssertionFailure),
            ("request timed out", ErrorKind::Timeout),
            ("segmentation fault", ErrorKind::Unknown),
        ];
        for (text, expected) in cases {
            assert_eq!(classify(text), expected, "{}", text);
        }
    }

    #[test]
    fn test_timed_out_flag_wins() {
        let temp = tempdir().unwrap();
        let output = CommandOutput {
            stderr: "SyntaxError: nope".to_string(),
            timed_out: true,
            exit_code: -1,
            ..Default::default()
        };
        let analysis = PatternAnalyzer.analyze(&output, "sleep 100", temp.path());
        assert_eq!(analysis.kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_file_from_command_preferred_over_trace() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("app.js"), "const x = ;\n").unwrap();
        std::fs::write(temp.path().join("other.js"), "").unwrap();

        let output = failed("other.js:9:1\napp.js:1:11\nSyntaxError: Unexpected token ';'");
        let analysis = PatternAnalyzer.analyze(&output, "node app.js", temp.path());

        assert_eq!(analysis.kind, ErrorKind::Syntax);
        assert_eq!(analysis.file, Some(temp.path().join("app.js")));
        assert_eq!(analysis.line, Some(1));
        assert_eq!(analysis.column, Some(11));
        assert_eq!(analysis.message, "SyntaxError: Unexpected token ';'");
        assert!(analysis.search_query.starts_with("syntax "));
    }

    #[test]
    fn test_command_argument_must_exist() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("real.py"), "").unwrap();

        let output = failed("  File \"real.py\", line 4\nSyntaxError: invalid syntax");
        let analysis = PatternAnalyzer.analyze(&output, "python missing.py", temp.path());
        assert_eq!(analysis.file, Some(temp.path().join("real.py")));
        assert_eq!(analysis.line, Some(4));
        assert_eq!(analysis.column, None);
    }

    #[test]
    fn test_wrapped_path_is_rejoined() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("src/components")).unwrap();
        std::fs::write(temp.path().join("src/components/widget.ts"), "").unwrap();

        // Terminal wrapped the path mid-word
        let output = failed("error at src/compon\nents/widget.ts:12:4 TypeError: bad");
        let analysis = PatternAnalyzer.analyze(&output, "npm test", temp.path());

        assert_eq!(analysis.kind, ErrorKind::Type);
        assert_eq!(analysis.file, Some(temp.path().join("src/components/widget.ts")));
        assert_eq!(analysis.line, Some(12));
        assert_eq!(analysis.column, Some(4));
    }

    #[test]
    fn test_unknown_without_file_is_not_actionable() {
        let temp = tempdir().unwrap();
        let analysis = PatternAnalyzer.analyze(&failed("something broke"), "make", temp.path());
        assert_eq!(analysis.kind, ErrorKind::Unknown);
        assert!(analysis.file.is_none());
        assert!(!analysis.is_actionable());
        assert_eq!(analysis.message, "something broke");
    }

    #[test]
    fn test_empty_output_message() {
        let temp = tempdir().unwrap();
        let output = CommandOutput {
            exit_code: 2,
            ..Default::default()
        };
        let analysis = PatternAnalyzer.analyze(&output, "false", temp.path());
        assert_eq!(analysis.message, "command exited with code 2");
    }
}
