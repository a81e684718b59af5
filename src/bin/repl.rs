// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! A quick + dirty little REPL (Read + Eval + Print Loop) command line tool
//! to run a subset string through the sanitizer and the expression census.
//!
//! Entering the sequence of two tildas `~~` followed by `↵` (the \[ENTER\]
//! key) initiates a multi-line mode which ends when `Ctrl-D` is pressed. In
//! this mode consecutive input is concatenated into one string before
//! processing.
//!
//! For every input the program prints the sanitized form (flagging inputs
//! whose parentheses cannot be balanced), the pattern census (EXISTS
//! blocks, session-view references, FID list sizes), and the multi-step
//! plan the engine would recommend.
//!
//! To start the loop enter...
//! ```bash
//! cargo run --bin repl↵
//! ```
//! To exit the program, press `Ctrl-D`.
//!

use filtermate::{FilterError, analyze, decompose, sanitize_subset_string};
use std::io::{self, Write};

#[doc(hidden)]
const RED: &str = "\x1b[31m";
#[doc(hidden)]
const GREEN: &str = "\x1b[32m";
#[doc(hidden)]
const YELLOW: &str = "\x1b[33m";
#[doc(hidden)]
const RESET: &str = "\x1b[0m";
#[doc(hidden)]
const MULTILINE: &str = "~~";

macro_rules! error {
    ( $( $arg: tt )* ) => {
        {
            let msg = ::std::fmt::format(::core::format_args!($($arg)*));
            eprintln!("{RED}{msg}{RESET}");
        }
    }
}

macro_rules! info {
    ( $( $arg: tt )* ) => {
        {
            let msg = ::std::fmt::format(::core::format_args!($($arg)*));
            println!("{YELLOW}{msg}{RESET}");
        }
    }
}

macro_rules! note {
    ( $( $arg: tt )* ) => {
        {
            let msg = ::std::fmt::format(::core::format_args!($($arg)*));
            println!("{GREEN}{msg}{RESET}");
        }
    }
}

#[doc(hidden)]
fn prompt(s: &str) -> Result<(), FilterError> {
    print!("{GREEN}{s} {RESET}");
    io::stdout().flush().map_err(FilterError::IO)
}

#[doc(hidden)]
fn process(input: &str) {
    let sanitized = sanitize_subset_string(input);
    if sanitized.malformed {
        error!("Unbalanced parentheses; input kept as-is.");
    } else if sanitized.text == input {
        note!("OK! (already clean)");
    } else {
        note!("OK! {}", sanitized.text);
    }

    let census = analyze(&sanitized.text);
    info!(
        "census: {} EXISTS, {} buffer call(s), {} spatial call(s), max IN list {}, \
         session view: {}, complex: {}",
        census.exists_blocks,
        census.buffer_calls,
        census.spatial_calls,
        census.max_in_list(),
        census.references_session_mv,
        census.is_complex(),
    );

    let steps = decompose(&sanitized.text, 10_000);
    if steps.len() > 1 {
        info!("plan ({} steps):", steps.len());
        for s in &steps {
            info!(
                "  {}. [{}] {} (~{:.0}% reduction, ~{}ms)",
                s.step_number,
                s.operation_type,
                s.expression,
                s.estimated_reduction_pct,
                s.estimated_cost_ms
            );
        }
    }
}

/// Executable main method.
///
/// Invoke it like so...
/// ```bash
/// cargo run --bin repl↵
/// ```
fn main() -> Result<(), FilterError> {
    note!("Enter a subset string to sanitize + analyze.\nWhen done, hit Ctrl-D.");
    let stdin = io::stdin();
    loop {
        prompt("> ")?;
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                note!("\nSee you later...");
                break;
            }

            Ok(_) => {
                let first = line.trim();
                let input = if first == MULTILINE {
                    info!("Enter multi-line mode. Exit w/ Ctrl-D");
                    let mut lines = String::new();
                    loop {
                        prompt(">>")?;
                        let mut next = String::new();
                        match stdin.read_line(&mut next) {
                            Ok(0) => break,
                            Ok(_) => lines.push_str(&next),
                            Err(x) => {
                                error!("Failed Read: {}", x);
                                break;
                            }
                        }
                    }
                    lines
                } else {
                    first.to_owned()
                };

                if !input.trim().is_empty() {
                    process(input.trim());
                }
            }
            Err(x) => {
                error!("Failed Read: {}", x);
                break;
            }
        }
    }

    Ok(())
}
