//! Source lines attached to findings.

use iacguard_fs::FileSystem;
use iacguard_types::{CodeLine, Finding, RepoPath, SourceRange};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Reads source files for findings, across every filesystem a scan touched.
///
/// Files are read at most once. The first filesystem holding a path wins, so the scanned
/// tree takes precedence over fetched modules.
pub struct SourceFiles {
    filesystems: Vec<Arc<dyn FileSystem>>,
    lines: HashMap<RepoPath, Option<Vec<String>>>,
}

impl SourceFiles {
    pub fn new(filesystems: Vec<Arc<dyn FileSystem>>) -> Self {
        let mut seen = HashSet::new();
        let filesystems = filesystems
            .into_iter()
            .filter(|fs| seen.insert(fs.location()))
            .collect();
        Self {
            filesystems,
            lines: HashMap::new(),
        }
    }

    fn lines(&mut self, path: &RepoPath) -> Option<&[String]> {
        if !self.lines.contains_key(path) {
            let text = self
                .filesystems
                .iter()
                .find(|fs| fs.is_file(path))
                .and_then(|fs| fs.read_to_string(path).ok());
            if text.is_none() {
                debug!("no source available for {}", path);
            }
            let lines = text.map(|t| t.lines().map(str::to_string).collect());
            self.lines.insert(path.clone(), lines);
        }
        self.lines.get(path).and_then(|l| l.as_deref())
    }

    /// Lines of the block a finding is attributed to, with the cause lines flagged.
    ///
    /// The block range frames the snippet; the finding range marks the cause. Without a
    /// block range in the same file the cause range is shown on its own.
    pub fn code_lines(&mut self, finding: &Finding) -> Vec<CodeLine> {
        let Some(cause) = &finding.range else {
            return Vec::new();
        };
        let frame = match &finding.resource_range {
            Some(block) if block.filename == cause.filename => block,
            _ => cause,
        };
        let Some(lines) = self.lines(&frame.filename) else {
            return Vec::new();
        };
        highlight(lines, frame, cause)
    }

    /// Fills in [`Finding::code`] for every finding that has a range.
    pub fn annotate(&mut self, findings: &mut [Finding]) {
        for finding in findings {
            finding.code = self.code_lines(finding);
        }
    }
}

fn highlight(lines: &[String], frame: &SourceRange, cause: &SourceRange) -> Vec<CodeLine> {
    let start = frame.start_line.min(cause.start_line).max(1);
    let end = frame.end_line.max(cause.end_line);
    (start..=end)
        .map_while(|number| {
            let content = lines.get(number as usize - 1)?;
            let is_cause = (cause.start_line..=cause.end_line).contains(&number);
            Some(CodeLine {
                number,
                content: content.clone(),
                is_cause,
                first_cause: number == cause.start_line,
                last_cause: number == cause.end_line,
            })
        })
        .collect()
}
