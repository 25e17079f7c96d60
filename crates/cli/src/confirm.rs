//! Typed confirmations in front of irreversible operations.

use std::io::{self, BufRead, Write};

/// Ask the operator to type `expected` exactly. Anything else, including a
/// closed stdin, is a refusal.
pub(crate) fn confirm(prompt: &str, expected: &str) -> bool {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    confirm_from(&mut input, &mut io::stderr(), prompt, expected)
}

fn confirm_from(
    input: &mut impl BufRead,
    out: &mut impl Write,
    prompt: &str,
    expected: &str,
) -> bool {
    let _ = writeln!(out, "{}", prompt);
    let _ = write!(out, "Type '{}' to continue: ", expected);
    let _ = out.flush();

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => line.trim() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(answer: &str, expected: &str) -> (bool, String) {
        let mut out = Vec::new();
        let ok = confirm_from(
            &mut Cursor::new(answer.as_bytes().to_vec()),
            &mut out,
            "This removes everything.",
            expected,
        );
        (ok, String::from_utf8(out).unwrap())
    }

    #[test]
    fn exact_answer_confirms() {
        let (ok, prompt) = ask("acme-site\n", "acme-site");
        assert!(ok);
        assert!(prompt.contains("Type 'acme-site' to continue"));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert!(ask("  close \n", "close").0);
    }

    #[test]
    fn anything_else_refuses() {
        assert!(!ask("yes\n", "acme-site").0);
        assert!(!ask("ACME-SITE\n", "acme-site").0);
        assert!(!ask("", "acme-site").0);
    }
}
