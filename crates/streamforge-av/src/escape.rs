//! Command-line argument quoting.
//!
//! Windows hands a process one flat command line which the C runtime splits
//! back into `argv` (the `CommandLineToArgvW` rules). To make the child see
//! exactly the intended literal strings, every argument is quoted here with
//! the inverse algorithm:
//!
//! - arguments without whitespace, quotes or a trailing backslash pass
//!   through untouched;
//! - otherwise the argument is wrapped in `"`; a run of `n` backslashes
//!   before a literal `"` becomes `2n + 1` backslashes, a run before the
//!   closing quote becomes `2n`, and every other backslash is kept as is.
//!
//! On Unix `argv` is passed to the kernel directly, so the quoted form is only
//! used for logging.

use std::borrow::Cow;

/// Characters that force an argument to be quoted.
const SPECIAL: &[char] = &[' ', '\t', '\n', '\x0B', '"'];

/// Whether `arg` must be wrapped in quotes to survive command-line splitting.
pub fn needs_quoting(arg: &str) -> bool {
    arg.is_empty() || arg.contains(SPECIAL) || arg.ends_with('\\')
}

/// Quote a single argument.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if !needs_quoting(arg) {
        return Cow::Borrowed(arg);
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');

    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(&mut out, backslashes * 2 + 1);
                out.push('"');
                backslashes = 0;
            }
            _ => {
                push_backslashes(&mut out, backslashes);
                out.push(c);
                backslashes = 0;
            }
        }
    }

    // Keep the trailing run from escaping the closing quote.
    push_backslashes(&mut out, backslashes * 2);
    out.push('"');
    Cow::Owned(out)
}

/// Quote every argument and join them with single spaces.
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_backslashes(out: &mut String, n: usize) {
    out.extend(std::iter::repeat('\\').take(n));
}
