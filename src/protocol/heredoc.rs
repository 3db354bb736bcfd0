//! Heredoc analyzer and fixer.
//!
//! Heredoc redirections interact badly with the marker protocol: the frame
//! appends `); exit_code=$? ...` after the command, so a terminator that is
//! not a standalone column-0 line swallows the frame tail into the heredoc
//! body and the shell waits forever. Full shell-grammar parsing is out of
//! reach for arbitrary bodies; only the two defect classes that reliably
//! break the protocol are repaired, and heredoc body content is never
//! touched.

use crate::constants::heredoc as heredoc_constants;
use crate::protocol::sudo;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// << EOF, <<- EOF, << "EOF", << 'EOF'. Quote pairing is verified in code;
// the regex crate has no backreferences.
static HEREDOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<<(-?)\s*(["']?)(\w+)(["']?)"#).expect("heredoc pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingTrailingNewline,
    IndentedTerminator,
    ComplexIndentation,
    MultipleHeredocs,
    TerminatorNotFound,
    PrivilegeEscalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub auto_fixable: bool,
    pub message: String,
}

/// Record of one applied repair, as a before/after fragment for diffing.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedFix {
    pub kind: IssueKind,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeredocFinding {
    pub terminator: String,
    pub quoted: bool,
    /// `<<-` form. Its tab-indentation tolerance is not specially modeled;
    /// terminator defects are treated the same as for `<<`.
    pub indent_stripping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminator_indent: Option<String>,
    pub issues: Vec<Issue>,
    pub fixes_applied: Vec<AppliedFix>,
    pub suggested_fixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeredocReport {
    pub original_command: String,
    /// Repaired command. Equal to `original_command` when nothing was
    /// auto-fixable; kept separate so callers can diff the two.
    pub fixed_command: String,
    pub changed: bool,
    pub findings: Vec<HeredocFinding>,
}

struct HeredocMatch {
    offset: usize,
    indent_stripping: bool,
    quoted: bool,
    terminator: String,
}

/// Filters out `<<` occurrences that are arithmetic shifts (`$((1<<2))`)
/// or herestrings (`<<< word`). The regex crate has no look-behind, so the
/// character before the match is checked here: a real heredoc redirect
/// never follows a word character or another `<`.
fn is_redirect(command: &str, start: usize) -> bool {
    match command[..start].chars().next_back() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '<' || c == '$' => false,
        _ => true,
    }
}

fn scan(command: &str) -> Vec<HeredocMatch> {
    HEREDOC_RE
        .captures_iter(command)
        .filter(|caps| is_redirect(command, caps.get(0).map_or(0, |m| m.start())))
        .map(|caps| {
            let open = caps.get(2).map_or("", |m| m.as_str());
            let close = caps.get(4).map_or("", |m| m.as_str());
            HeredocMatch {
                offset: caps.get(0).map_or(0, |m| m.start()),
                indent_stripping: caps.get(1).map_or(false, |m| !m.as_str().is_empty()),
                quoted: !open.is_empty() && open == close,
                terminator: caps[3].to_string(),
            }
        })
        .collect()
}

/// True when indentation is plain enough to strip safely: one kind of
/// whitespace character, short. Mixed tabs/spaces or long runs are left
/// alone and reported as suggestions.
fn is_simple_indent(indent: &str) -> bool {
    if indent.is_empty() || indent.len() > heredoc_constants::MAX_SIMPLE_INDENT {
        return false;
    }
    let first = indent.chars().next().unwrap_or(' ');
    (first == ' ' || first == '\t') && indent.chars().all(|c| c == first)
}

/// Analyze a command for heredoc syntax and repair the auto-fixable defect
/// classes. Returns `None` when the command contains no heredoc.
pub fn analyze(command: &str, auto_fix: bool) -> Option<HeredocReport> {
    let matches = scan(command);
    if matches.is_empty() {
        return None;
    }

    let escalation = sudo::detect(command);

    if matches.len() > 1 {
        // Which terminator belongs to which redirect is ambiguous without
        // real parsing; report only, repair nothing.
        let findings = matches
            .iter()
            .map(|m| {
                let mut finding = new_finding(m);
                finding.issues.push(Issue {
                    kind: IssueKind::MultipleHeredocs,
                    severity: Severity::Warning,
                    auto_fixable: false,
                    message: format!(
                        "{} heredocs in one command; terminator mapping is ambiguous",
                        matches.len()
                    ),
                });
                finding
                    .suggested_fixes
                    .push("split the command so each call carries a single heredoc".to_string());
                if escalation {
                    push_escalation_issue(&mut finding);
                }
                finding
            })
            .collect();
        return Some(HeredocReport {
            original_command: command.to_string(),
            fixed_command: command.to_string(),
            changed: false,
            findings,
        });
    }

    let m = &matches[0];
    let mut finding = new_finding(m);
    let mut lines: Vec<String> = command.split('\n').map(str::to_string).collect();
    let redirect_line = command[..m.offset].matches('\n').count();

    let terminator_line = lines
        .iter()
        .enumerate()
        .skip(redirect_line + 1)
        .find(|(_, line)| line.trim() == m.terminator)
        .map(|(idx, _)| idx);

    match terminator_line {
        None => {
            finding.issues.push(Issue {
                kind: IssueKind::TerminatorNotFound,
                severity: Severity::Error,
                auto_fixable: false,
                message: format!("no line contains only the terminator '{}'", m.terminator),
            });
            finding.suggested_fixes.push(format!(
                "end the heredoc with a line containing only '{}' followed by a newline",
                m.terminator
            ));
        }
        Some(idx) => {
            let line = lines[idx].clone();
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            if !indent.is_empty() {
                finding.terminator_indent = Some(indent.clone());
                if is_simple_indent(&indent) {
                    finding.issues.push(Issue {
                        kind: IssueKind::IndentedTerminator,
                        severity: Severity::Warning,
                        auto_fixable: true,
                        message: format!(
                            "terminator '{}' is indented; default heredoc syntax requires column 0",
                            m.terminator
                        ),
                    });
                    if auto_fix {
                        lines[idx] = m.terminator.clone();
                        finding.fixes_applied.push(AppliedFix {
                            kind: IssueKind::IndentedTerminator,
                            before: line.clone(),
                            after: m.terminator.clone(),
                        });
                    } else {
                        finding.suggested_fixes.push(format!(
                            "remove the leading whitespace before '{}'",
                            m.terminator
                        ));
                    }
                } else {
                    finding.issues.push(Issue {
                        kind: IssueKind::ComplexIndentation,
                        severity: Severity::Warning,
                        auto_fixable: false,
                        message: format!(
                            "terminator '{}' carries mixed or long indentation",
                            m.terminator
                        ),
                    });
                    finding.suggested_fixes.push(format!(
                        "move the terminator '{}' to column 0",
                        m.terminator
                    ));
                }
            }

            // Terminator on the final line with no newline after it: the
            // shell never sees it as a standalone line, and the session
            // hangs. Dominant failure mode in practice.
            if idx == lines.len() - 1 {
                finding.issues.push(Issue {
                    kind: IssueKind::MissingTrailingNewline,
                    severity: Severity::Error,
                    auto_fixable: true,
                    message: "no newline after the heredoc terminator line".to_string(),
                });
                if auto_fix {
                    let before = lines[idx].clone();
                    lines.push(String::new());
                    finding.fixes_applied.push(AppliedFix {
                        kind: IssueKind::MissingTrailingNewline,
                        before,
                        after: format!("{}\n", lines[idx]),
                    });
                } else {
                    finding
                        .suggested_fixes
                        .push("append a newline after the terminator line".to_string());
                }
            }
        }
    }

    if escalation {
        push_escalation_issue(&mut finding);
    }

    let fixed_command = lines.join("\n");
    let changed = fixed_command != command;
    Some(HeredocReport {
        original_command: command.to_string(),
        fixed_command,
        changed,
        findings: vec![finding],
    })
}

fn new_finding(m: &HeredocMatch) -> HeredocFinding {
    HeredocFinding {
        terminator: m.terminator.clone(),
        quoted: m.quoted,
        indent_stripping: m.indent_stripping,
        terminator_indent: None,
        issues: Vec::new(),
        fixes_applied: Vec::new(),
        suggested_fixes: Vec::new(),
    }
}

fn push_escalation_issue(finding: &mut HeredocFinding) {
    finding.issues.push(Issue {
        kind: IssueKind::PrivilegeEscalation,
        severity: Severity::Info,
        auto_fixable: false,
        message: "heredoc combined with privilege escalation".to_string(),
    });
    finding.suggested_fixes.push(
        "review sudo prompt handling; heredoc commands are flagged but never rewritten".to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::{analyze, IssueKind, Severity};

    #[test]
    fn commands_without_heredoc_yield_no_report() {
        assert!(analyze("ls -la /tmp", true).is_none());
        assert!(analyze("echo hello", true).is_none());
        assert!(analyze("awk '{print $1 < 2}'", true).is_none());
    }

    #[test]
    fn shifts_and_herestrings_are_not_heredocs() {
        assert!(analyze("echo $((1<<2))", true).is_none());
        assert!(analyze("cat <<< word", true).is_none());
        assert!(analyze("echo $((x<<SHIFT))", true).is_none());
    }

    #[test]
    fn missing_trailing_newline_is_appended_and_nothing_else_changes() {
        let input = "cat > /tmp/x << EOF\nhi\nEOF";
        let report = analyze(input, true).expect("heredoc report");
        assert!(report.changed);
        assert_eq!(report.fixed_command, format!("{}\n", input));
        let finding = &report.findings[0];
        assert_eq!(finding.fixes_applied.len(), 1);
        assert_eq!(
            finding.fixes_applied[0].kind,
            IssueKind::MissingTrailingNewline
        );
    }

    #[test]
    fn well_formed_heredoc_reports_no_issues() {
        let input = "cat > /tmp/x << EOF\nhi\nEOF\n";
        let report = analyze(input, true).expect("heredoc report");
        assert!(!report.changed);
        assert_eq!(report.fixed_command, input);
        assert!(report.findings[0].issues.is_empty());
    }

    #[test]
    fn simply_indented_terminator_is_unindented() {
        let input = "cat << EOF\nbody\n    EOF\necho done\n";
        let report = analyze(input, true).expect("heredoc report");
        assert!(report.changed);
        assert_eq!(report.fixed_command, "cat << EOF\nbody\nEOF\necho done\n");
        let finding = &report.findings[0];
        assert_eq!(finding.terminator_indent.as_deref(), Some("    "));
        assert_eq!(finding.fixes_applied[0].kind, IssueKind::IndentedTerminator);
        assert_eq!(finding.fixes_applied[0].before, "    EOF");
        assert_eq!(finding.fixes_applied[0].after, "EOF");
    }

    #[test]
    fn mixed_indentation_is_reported_not_fixed() {
        let input = "cat << EOF\nbody\n \t EOF\n";
        let report = analyze(input, true).expect("heredoc report");
        assert!(!report.changed);
        let finding = &report.findings[0];
        assert!(finding
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::ComplexIndentation && !i.auto_fixable));
        assert!(!finding.suggested_fixes.is_empty());
    }

    #[test]
    fn long_indentation_is_reported_not_fixed() {
        let input = format!("cat << EOF\nbody\n{}EOF\n", " ".repeat(12));
        let report = analyze(&input, true).expect("heredoc report");
        assert!(!report.changed);
        assert!(report.findings[0]
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::ComplexIndentation));
    }

    #[test]
    fn body_content_is_never_altered() {
        let input = "cat > /tmp/x << EOF\n  indented body\nkeep\t whitespace \n   EOF";
        let report = analyze(input, true).expect("heredoc report");
        assert_eq!(
            report.fixed_command,
            "cat > /tmp/x << EOF\n  indented body\nkeep\t whitespace \nEOF\n"
        );
    }

    #[test]
    fn multiple_heredocs_are_ambiguous_and_untouched() {
        let input = "cat << A > x\n1\nA\ncat << B > y\n2\nB";
        let report = analyze(input, true).expect("heredoc report");
        assert!(!report.changed);
        assert_eq!(report.fixed_command, input);
        assert_eq!(report.findings.len(), 2);
        for finding in &report.findings {
            assert!(finding
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::MultipleHeredocs));
            assert!(finding.fixes_applied.is_empty());
        }
    }

    #[test]
    fn unterminated_heredoc_is_reported() {
        let input = "cat << EOF\nbody with no terminator";
        let report = analyze(input, true).expect("heredoc report");
        assert!(!report.changed);
        let finding = &report.findings[0];
        assert!(finding
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::TerminatorNotFound && i.severity == Severity::Error));
    }

    #[test]
    fn sudo_combination_is_flagged_never_rewritten() {
        let input = "sudo tee /etc/motd << EOF\nhello\nEOF\n";
        let report = analyze(input, true).expect("heredoc report");
        assert!(!report.changed);
        let finding = &report.findings[0];
        assert!(finding
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::PrivilegeEscalation && i.severity == Severity::Info));
    }

    #[test]
    fn quoted_terminators_are_recognized() {
        let report = analyze("cat << 'EOF'\nbody\nEOF\n", true).expect("heredoc report");
        assert!(report.findings[0].quoted);
        assert_eq!(report.findings[0].terminator, "EOF");

        let report = analyze("cat <<- EOF\nbody\nEOF\n", true).expect("heredoc report");
        assert!(report.findings[0].indent_stripping);
        assert!(!report.findings[0].quoted);
    }

    #[test]
    fn disabled_auto_fix_downgrades_to_suggestions() {
        let input = "cat << EOF\nhi\nEOF";
        let report = analyze(input, false).expect("heredoc report");
        assert!(!report.changed);
        assert_eq!(report.fixed_command, input);
        let finding = &report.findings[0];
        assert!(finding.fixes_applied.is_empty());
        assert!(finding
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::MissingTrailingNewline && i.auto_fixable));
        assert!(!finding.suggested_fixes.is_empty());
    }
}
