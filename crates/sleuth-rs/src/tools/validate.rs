//! Command-safety validation for shell invocations.
//!
//! Pure string checks, no execution. Chaining and substitution operators are
//! denied outright; pipes are allowed because each stage only reads the
//! previous stage's stdout. With an allowlist configured, the leading
//! executable token of every pipe segment must appear in it.

/// Validate a command line before it reaches the shell.
///
/// Returns `Err(reason)` when the command must be denied. The literal
/// sequences `;`, `&&`, `$(` and backtick deny wherever they appear, quoted
/// or not. `|` and `||` pass the operator check.
pub fn validate_command(command: &str, allowlist: Option<&[String]>) -> Result<(), String> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err("empty command".to_string());
    }

    if command.contains(';') {
        return Err("command chaining with ';' is not allowed".to_string());
    }
    if command.contains("&&") {
        return Err("command chaining with '&&' is not allowed".to_string());
    }
    if command.contains("$(") {
        return Err("command substitution with '$(' is not allowed".to_string());
    }
    if command.contains('`') {
        return Err("command substitution with backticks is not allowed".to_string());
    }

    if let Some(allowed) = allowlist {
        for segment in split_pipe_segments(trimmed) {
            let Some(executable) = segment.split_whitespace().next() else {
                return Err("empty pipeline segment".to_string());
            };
            if !allowed.iter().any(|a| a == executable) {
                return Err(format!("'{executable}' is not in the allowed command list"));
            }
        }
    }

    Ok(())
}

/// Split a command line on unquoted `|` / `||`. Quoted pipes stay inside
/// their segment.
fn split_pipe_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in command.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            '|' if !in_single && !in_double => {
                // `||` produces an empty second half that is skipped below,
                // so both operators split the same way.
                segments.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_commands_pass() {
        assert!(validate_command("uptime", None).is_ok());
        assert!(validate_command("df -h /", None).is_ok());
    }

    #[test]
    fn semicolon_denies() {
        let err = validate_command("ls; rm -rf /", None).unwrap_err();
        assert!(err.contains("';'"));
    }

    #[test]
    fn and_chain_denies() {
        assert!(validate_command("make && make install", None).is_err());
    }

    #[test]
    fn command_substitution_denies() {
        assert!(validate_command("echo $(whoami)", None).is_err());
        assert!(validate_command("echo `id`", None).is_err());
    }

    #[test]
    fn quoted_semicolon_still_denies() {
        assert!(validate_command("echo 'a; b'", None).is_err());
    }

    #[test]
    fn pipes_pass_operator_check() {
        assert!(validate_command("ps aux | grep nginx", None).is_ok());
        assert!(validate_command("grep -q foo bar || true", None).is_ok());
    }

    #[test]
    fn empty_command_denies() {
        assert!(validate_command("   ", None).is_err());
    }

    #[test]
    fn allowlist_checks_every_pipe_segment() {
        let list = allow(&["ps", "grep"]);
        assert!(validate_command("ps aux | grep nginx", Some(&list)).is_ok());

        let err = validate_command("ps aux | awk '{print $1}'", Some(&list)).unwrap_err();
        assert!(err.contains("'awk'"));
    }

    #[test]
    fn allowlist_checks_leading_token_only() {
        let list = allow(&["grep"]);
        // "rm" appears as an argument, not as an executable.
        assert!(validate_command("grep rm notes.txt", Some(&list)).is_ok());
    }

    #[test]
    fn quoted_pipes_do_not_split_segments() {
        let list = allow(&["grep"]);
        assert!(validate_command("grep 'a|b' notes.txt", Some(&list)).is_ok());
        assert_eq!(split_pipe_segments("grep 'a|b' f"), vec!["grep 'a|b' f"]);
    }

    #[test]
    fn or_chain_validates_both_sides() {
        let list = allow(&["grep"]);
        assert!(validate_command("grep foo f || grep bar f", Some(&list)).is_ok());
        assert!(validate_command("grep foo f || cat f", Some(&list)).is_err());
    }
}
