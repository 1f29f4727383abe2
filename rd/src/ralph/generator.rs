//! CorrectionGenerator - proposes a search/replace plan for an analysed failure
//!
//! [`ChainGenerator`] tries, in order: deterministic pattern rules, the
//! optional LLM-backed generator, and finally a comment-out-and-annotate
//! fallback. Every plan is a suggestion; the applier and the re-execution
//! decide whether it was any good.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::GeneratorError;
use crate::domain::{CorrectionPlan, ErrorAnalysis, ErrorKind, PlanSource};
use crate::llm::{CompletionRequest, LlmClient, Message};

/// Marker written by the fallback generator
pub const FIXME_MARKER: &str = "FIXME(ralphd)";

const CORRECTION_TEMPLATE: &str = include_str!("../../prompts/correction.pmt");

const SYSTEM_PROMPT: &str = "You repair source files so that a failing validation command passes. \
You answer with exactly one JSON object containing search, replace and rationale.";

/// Lines of file content shown either side of the error line
const EXCERPT_RADIUS: usize = 20;

/// Characters of command output included in the prompt
const MAX_PROMPT_OUTPUT: usize = 4000;

/// What a generator knows about the task besides the analysis
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionContext {
    pub task_id: String,
    pub description: String,
    pub command: String,
    pub cwd: PathBuf,

    /// 1-indexed correction cycle
    pub attempt: u32,

    /// Raw output of the failing run
    pub output: String,
}

#[async_trait]
pub trait CorrectionGenerator: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// A plan, or Ok(None) when this generator has nothing to offer
    async fn generate(
        &self,
        analysis: &ErrorAnalysis,
        context: &CorrectionContext,
    ) -> Result<Option<CorrectionPlan>, GeneratorError>;
}

fn read_target(path: &Path) -> Result<String, GeneratorError> {
    fs::read_to_string(path).map_err(|e| GeneratorError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// 1-indexed line lookup
fn nth_line(content: &str, line: Option<u32>) -> Option<&str> {
    let n = line? as usize;
    if n == 0 {
        return None;
    }
    content.lines().nth(n - 1)
}

// ============================================================================
// Rule-based generator
// ============================================================================

struct Rule {
    name: &'static str,
    kinds: &'static [ErrorKind],

    /// File extensions the rule applies to (empty means any)
    extensions: &'static [&'static str],

    pattern: Regex,
    replacement: &'static str,
    rationale: &'static str,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            name: "incomplete-assignment",
            kinds: &[ErrorKind::Syntax, ErrorKind::Unknown],
            extensions: &[],
            pattern: Regex::new(
                r"^(?P<lhs>\s*(?:(?:export\s+)?(?:const|let|var)\s+)?[A-Za-z_$][\w$.]*\s*=)\s*;(?P<rest>.*)$",
            )
            .expect("incomplete-assignment regex is valid"),
            replacement: "${lhs} 0;${rest}",
            rationale: "Assignment has no right-hand side; substitute a default value",
        },
        Rule {
            name: "double-semicolon",
            kinds: &[ErrorKind::Syntax],
            extensions: &[],
            pattern: Regex::new(r";\s*;(?P<rest>\s*)$").expect("double-semicolon regex is valid"),
            replacement: ";${rest}",
            rationale: "Remove the stray empty statement",
        },
        Rule {
            name: "missing-block-colon",
            kinds: &[ErrorKind::Syntax],
            extensions: &["py"],
            pattern: Regex::new(
                r"^(?P<head>\s*(?:if|elif|else|for|while|def|class|try|except|finally|with)\b[^:#]*?)\s*$",
            )
            .expect("missing-block-colon regex is valid"),
            replacement: "${head}:",
            rationale: "Block statement is missing its trailing colon",
        },
    ]
});

/// Deterministic pattern rules keyed on the error kind
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedGenerator;

impl RuleBasedGenerator {
    fn try_line(&self, line: &str, kind: ErrorKind, ext: &str) -> Option<(&'static Rule, String)> {
        RULES
            .iter()
            .filter(|r| r.kinds.contains(&kind))
            .filter(|r| r.extensions.is_empty() || r.extensions.contains(&ext))
            .find_map(|r| {
                let replaced = r.pattern.replace(line, r.replacement);
                (replaced != line).then(|| (r, replaced.into_owned()))
            })
    }
}

#[async_trait]
impl CorrectionGenerator for RuleBasedGenerator {
    fn name(&self) -> &str {
        "rules"
    }

    async fn generate(
        &self,
        analysis: &ErrorAnalysis,
        _context: &CorrectionContext,
    ) -> Result<Option<CorrectionPlan>, GeneratorError> {
        let Some(file) = &analysis.file else {
            return Ok(None);
        };
        debug!(?file, kind = %analysis.kind, line = ?analysis.line, "RuleBasedGenerator::generate: called");
        let content = read_target(file)?;
        let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");

        // The reported line first, then the whole file
        let reported = analysis
            .line
            .and_then(|n| nth_line(&content, Some(n)).map(|l| (n, l)));
        let candidates = reported
            .into_iter()
            .chain(content.lines().enumerate().map(|(i, l)| (i as u32 + 1, l)));
        for (number, line) in candidates {
            if let Some((rule, replaced)) = self.try_line(line, analysis.kind, ext) {
                info!(rule = rule.name, file = %file.display(), line = number, "Correction rule matched");
                return Ok(Some(CorrectionPlan {
                    target_file: file.clone(),
                    line: Some(number),
                    search: line.to_string(),
                    replace: replaced,
                    rationale: rule.rationale.to_string(),
                    source: PlanSource::Rule(rule.name.to_string()),
                }));
            }
        }

        debug!("RuleBasedGenerator::generate: no rule matched");
        Ok(None)
    }
}

// ============================================================================
// Comment-out fallback
// ============================================================================

/// Comments out the offending line and annotates it with the error
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackGenerator;

/// Line-comment prefix for a file extension; None when unknown
fn comment_prefix(ext: &str) -> Option<&'static str> {
    match ext {
        "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "rs" | "c" | "h" | "cc" | "cpp" | "hpp" | "java" | "kt"
        | "go" | "swift" | "cs" | "scala" | "dart" | "php" => Some("//"),
        "py" | "sh" | "bash" | "rb" | "pl" | "r" | "yml" | "yaml" | "toml" | "mk" | "ex" | "exs" => Some("#"),
        "sql" | "lua" | "hs" => Some("--"),
        _ => None,
    }
}

#[async_trait]
impl CorrectionGenerator for FallbackGenerator {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate(
        &self,
        analysis: &ErrorAnalysis,
        _context: &CorrectionContext,
    ) -> Result<Option<CorrectionPlan>, GeneratorError> {
        let Some(file) = &analysis.file else {
            return Ok(None);
        };
        let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
        let Some(prefix) = comment_prefix(ext) else {
            debug!(?file, "FallbackGenerator::generate: unknown comment syntax");
            return Ok(None);
        };

        let content = read_target(file)?;
        let Some(line) = nth_line(&content, analysis.line) else {
            return Ok(None);
        };
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(prefix) {
            // Blank or already a comment; commenting again changes nothing useful
            return Ok(None);
        }

        let indent = &line[..line.len() - trimmed.len()];
        let replace = format!(
            "{indent}{prefix} {FIXME_MARKER}: {}: {}\n{indent}{prefix} {trimmed}",
            analysis.kind,
            analysis.message.replace('\n', " ")
        );
        debug!(?file, line = ?analysis.line, "FallbackGenerator::generate: commenting out line");

        Ok(Some(CorrectionPlan {
            target_file: file.clone(),
            line: analysis.line,
            search: line.to_string(),
            replace,
            rationale: "Correct fix unknown; comment out the failing line and flag it for review".to_string(),
            source: PlanSource::Fallback,
        }))
    }
}

// ============================================================================
// LLM-backed generator
// ============================================================================

/// Shape the model must answer with
#[derive(Debug, Deserialize)]
struct LlmPatch {
    search: String,
    replace: String,
    #[serde(default)]
    rationale: Option<String>,
}

/// Asks the text-generation collaborator for a patch
pub struct LlmGenerator {
    client: Arc<dyn LlmClient>,
    hbs: Handlebars<'static>,
    max_tokens: u32,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn LlmClient>, max_tokens: u32) -> Result<Self, GeneratorError> {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.register_template_string("correction", CORRECTION_TEMPLATE)
            .map_err(|e| GeneratorError::Template(e.to_string()))?;
        Ok(Self {
            client,
            hbs,
            max_tokens,
        })
    }

    fn render_prompt(
        &self,
        analysis: &ErrorAnalysis,
        context: &CorrectionContext,
        content: Option<&str>,
    ) -> Result<String, GeneratorError> {
        let excerpt = content.map(|c| excerpt(c, analysis.line)).unwrap_or_default();
        let output: String = tail_chars(&context.output, MAX_PROMPT_OUTPUT);
        let data = serde_json::json!({
            "task_id": context.task_id,
            "description": context.description,
            "command": context.command,
            "attempt": context.attempt,
            "kind": analysis.kind.to_string(),
            "message": analysis.message,
            "file": analysis.file.as_ref().map(|f| f.display().to_string()),
            "line": analysis.line,
            "column": analysis.column,
            "excerpt": excerpt,
            "output": output,
        });
        self.hbs
            .render("correction", &data)
            .map_err(|e| GeneratorError::Template(e.to_string()))
    }
}

/// Numbered lines around `line` (or the head of the file)
fn excerpt(content: &str, line: Option<u32>) -> String {
    let center = line.map(|l| l.saturating_sub(1) as usize).unwrap_or(0);
    let start = center.saturating_sub(EXCERPT_RADIUS);
    content
        .lines()
        .enumerate()
        .skip(start)
        .take(EXCERPT_RADIUS * 2 + 1)
        .map(|(i, l)| format!("{:>5} | {}", i + 1, l))
        .collect::<Vec<_>>()
        .join("\n")
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max)).collect()
}

/// Pull the outermost JSON object out of a model answer
fn parse_patch(text: &str) -> Option<LlmPatch> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[async_trait]
impl CorrectionGenerator for LlmGenerator {
    fn name(&self) -> &str {
        "llm"
    }

    async fn generate(
        &self,
        analysis: &ErrorAnalysis,
        context: &CorrectionContext,
    ) -> Result<Option<CorrectionPlan>, GeneratorError> {
        let Some(file) = &analysis.file else {
            return Ok(None);
        };
        debug!(?file, attempt = context.attempt, "LlmGenerator::generate: called");
        let content = read_target(file)?;
        let prompt = self.render_prompt(analysis, context, Some(&content))?;

        let response = self
            .client
            .complete(CompletionRequest {
                system_prompt: SYSTEM_PROMPT.to_string(),
                messages: vec![Message::user(prompt)],
                max_tokens: self.max_tokens,
            })
            .await?;

        let Some(patch) = response.content.as_deref().and_then(parse_patch) else {
            warn!("LLM answer was not a usable JSON patch");
            return Ok(None);
        };
        if patch.search.is_empty() {
            warn!("LLM patch has an empty search text");
            return Ok(None);
        }

        Ok(Some(CorrectionPlan {
            target_file: file.clone(),
            line: None,
            search: patch.search,
            replace: patch.replace,
            rationale: patch.rationale.unwrap_or_else(|| "LLM suggestion".to_string()),
            source: PlanSource::Llm,
        }))
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Runs generators in order and returns the first plan that changes something
pub struct ChainGenerator {
    stages: Vec<Arc<dyn CorrectionGenerator>>,
}

impl ChainGenerator {
    pub fn new(stages: Vec<Arc<dyn CorrectionGenerator>>) -> Self {
        Self { stages }
    }

    /// Rules, then the LLM when given, then the comment-out fallback
    pub fn standard(llm: Option<LlmGenerator>) -> Self {
        let mut stages: Vec<Arc<dyn CorrectionGenerator>> = vec![Arc::new(RuleBasedGenerator)];
        if let Some(llm) = llm {
            stages.push(Arc::new(llm));
        }
        stages.push(Arc::new(FallbackGenerator));
        Self::new(stages)
    }
}

#[async_trait]
impl CorrectionGenerator for ChainGenerator {
    fn name(&self) -> &str {
        "chain"
    }

    async fn generate(
        &self,
        analysis: &ErrorAnalysis,
        context: &CorrectionContext,
    ) -> Result<Option<CorrectionPlan>, GeneratorError> {
        for stage in &self.stages {
            match stage.generate(analysis, context).await {
                Ok(Some(plan)) if !plan.is_noop() => {
                    debug!(stage = stage.name(), "ChainGenerator::generate: plan found");
                    return Ok(Some(plan));
                }
                Ok(Some(_)) => debug!(stage = stage.name(), "ChainGenerator::generate: ignoring no-op plan"),
                Ok(None) => debug!(stage = stage.name(), "ChainGenerator::generate: nothing proposed"),
                Err(e) => warn!(stage = stage.name(), error = %e, "Correction generator failed, trying next"),
            }
        }
        Ok(None)
    }
}
