//! Outcome classification for transfer attempts.

use crate::transfer::CommandOutput;

/// rsync exit codes that retrying cannot fix (syntax/usage, unsupported action)
const HARD_EXIT_CODES: &[i32] = &[1, 4];

/// stderr signatures reported by rsync/ssh/journalctl for hard errors
const HARD_SIGNATURES: &[&str] = &[
    "No such file or directory",
    "Permission denied",
    "Host key verification failed",
    "Invalid argument",
    "No journal files were found",
];

const MAX_SUMMARY_LEN: usize = 400;

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable(String),
    Fatal(String),
}

pub fn classify(output: &CommandOutput) -> Outcome {
    if output.success() {
        return Outcome::Success;
    }

    let summary = summarize(output);
    let hard_code = output
        .status
        .is_some_and(|code| HARD_EXIT_CODES.contains(&code));
    let hard_signature = HARD_SIGNATURES
        .iter()
        .any(|sig| output.stderr.contains(sig));

    if hard_code || hard_signature {
        Outcome::Fatal(summary)
    } else {
        Outcome::Retryable(summary)
    }
}

/// A missing program is a configuration problem; any other spawn/IO failure
/// may be transient.
pub fn classify_io_error(err: &std::io::Error) -> Outcome {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            Outcome::Fatal(format!("cannot run transfer: {}", err))
        }
        _ => Outcome::Retryable(format!("transfer I/O error: {}", err)),
    }
}

/// One-line error summary: exit status plus the tail of stderr
pub fn summarize(output: &CommandOutput) -> String {
    let status = match output.status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };

    let detail: Vec<&str> = output
        .stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail = detail[detail.len().saturating_sub(3)..].join(" | ");

    let mut summary = if tail.is_empty() {
        status
    } else {
        format!("{}: {}", status, tail)
    };
    if summary.len() > MAX_SUMMARY_LEN {
        let mut cut = MAX_SUMMARY_LEN;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
        summary.push_str("...");
    }
    summary
}
