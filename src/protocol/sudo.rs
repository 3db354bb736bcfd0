//! Privilege-escalation rewriter.
//!
//! A bare `sudo` on an interactive shell blocks forever waiting for a TTY
//! password prompt, which stalls the marker protocol. Invocations are
//! rewritten into non-hanging forms: `sudo -S` with the password piped via
//! stdin when one is available, `sudo -n` (fail fast) otherwise. `su`
//! without `-c` is detected for awareness but never rewritten.

use once_cell::sync::Lazy;
use regex::Regex;

static SUDO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsudo\s+").expect("sudo pattern"));
static SU_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsu\s+").expect("su pattern"));
// The regex crate has no look-around; the flag that makes an occurrence
// safe is checked against the text following each match instead.
static SUDO_SAFE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-[nS]\b").expect("sudo flag pattern"));
static SU_SAFE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-c\b").expect("su flag pattern"));

/// Byte range of the first `sudo ` (or `su `) occurrence not already
/// carrying a non-interactive flag. All occurrences are checked.
fn first_bare(command: &str, word: &Regex, safe: &Regex) -> Option<(usize, usize)> {
    word.find_iter(command)
        .find(|m| !safe.is_match(&command[m.end()..]))
        .map(|m| (m.start(), m.end()))
}

/// True when the command contains privilege escalation that would block on
/// an interactive password prompt.
pub fn detect(command: &str) -> bool {
    first_bare(command, &SUDO_RE, &SUDO_SAFE_RE).is_some()
        || first_bare(command, &SU_RE, &SU_SAFE_RE).is_some()
}

/// Rewrite the first bare `sudo ` into a non-hanging form.
///
/// Returns `(rewritten, true)` when a rewrite happened, `(original, false)`
/// otherwise. `su` detection alone never triggers a rewrite; there is no
/// safe generic transformation for it.
pub fn rewrite(command: &str, password: Option<&str>) -> (String, bool) {
    let Some((start, end)) = first_bare(command, &SUDO_RE, &SUDO_SAFE_RE) else {
        return (command.to_string(), false);
    };

    match password {
        Some(password) => {
            let patched = format!("{}sudo -S {}", &command[..start], &command[end..]);
            (format!("echo '{}' | {}", password, patched), true)
        }
        None => (
            format!("{}sudo -n {}", &command[..start], &command[end..]),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{detect, rewrite};

    #[test]
    fn detects_bare_sudo() {
        assert!(detect("sudo systemctl restart nginx"));
        assert!(detect("apt update && sudo apt upgrade"));
    }

    #[test]
    fn non_interactive_sudo_is_not_flagged() {
        assert!(!detect("sudo -n ls /root"));
        assert!(!detect("echo 'pw' | sudo -S ls /root"));
    }

    #[test]
    fn sudo_with_other_flags_is_still_flagged() {
        assert!(detect("sudo -u postgres psql"));
    }

    #[test]
    fn su_without_dash_c_is_flagged() {
        assert!(detect("su root"));
        assert!(!detect("su -c 'ls /root' root"));
    }

    #[test]
    fn plain_words_do_not_match() {
        assert!(!detect("echo sudoku"));
        assert!(!detect("cat visudo.log"));
        assert!(!detect("surface area"));
    }

    #[test]
    fn rewrite_without_password_uses_fail_fast_flag() {
        let (fixed, changed) = rewrite("sudo cat /etc/shadow", None);
        assert!(changed);
        assert_eq!(fixed, "sudo -n cat /etc/shadow");
    }

    #[test]
    fn rewrite_with_password_pipes_stdin() {
        let (fixed, changed) = rewrite("sudo ls /root", Some("hunter2"));
        assert!(changed);
        assert_eq!(fixed, "echo 'hunter2' | sudo -S ls /root");
    }

    #[test]
    fn only_first_bare_occurrence_is_rewritten() {
        let (fixed, changed) = rewrite("sudo -n apt update && sudo apt upgrade", None);
        assert!(changed);
        assert_eq!(fixed, "sudo -n apt update && sudo -n apt upgrade");
    }

    #[test]
    fn rewrite_is_idempotent_on_safe_input() {
        let (once, _) = rewrite("sudo cat /etc/shadow", None);
        let (twice, changed) = rewrite(&once, None);
        assert!(!changed);
        assert_eq!(once, twice);

        let (once_pw, _) = rewrite("sudo ls", Some("pw"));
        let (twice_pw, changed_pw) = rewrite(&once_pw, Some("pw"));
        assert!(!changed_pw);
        assert_eq!(once_pw, twice_pw);
    }

    #[test]
    fn bare_su_alone_is_detected_but_not_rewritten() {
        assert!(detect("su root"));
        let (fixed, changed) = rewrite("su root", Some("pw"));
        assert!(!changed);
        assert_eq!(fixed, "su root");
    }
}
