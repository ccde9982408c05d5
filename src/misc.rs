// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous things.

use std::thread;

use console::Term;
use crossbeam_channel::bounded;
use is_terminal::IsTerminal;
use log::trace;

/// Round a number to a number of significant figures, e.g. 0.0123456 with 2
/// significant figures is 0.012. Zero and non-finite values are returned
/// untouched.
pub(crate) fn round_to_sig_figs(x: f64, sig_figs: i32) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let magnitude = x.abs().log10().floor() as i32;
    let factor = 10_f64.powi(sig_figs - 1 - magnitude);
    (x * factor).round() / factor
}

/// Format a number like C's "%.3g" would; this keeps engine parameter strings
/// short and free of float noise.
pub(crate) fn format_sig_figs(x: f64, sig_figs: i32) -> String {
    let rounded = round_to_sig_figs(x, sig_figs);
    // Rust's float formatting gives the shortest representation that
    // round-trips, which is what we want after rounding.
    format!("{rounded}")
}

/// Remove the previous wait line (if there is one) and write `line`.
fn update_wait_line(term: &Term, printed: bool, line: Option<&str>) -> std::io::Result<()> {
    if printed {
        term.move_cursor_up(1)?;
        term.clear_line()?;
    }
    if let Some(line) = line {
        term.write_line(line)?;
    }
    Ok(())
}

fn is_a_tty() -> bool {
    std::io::stdout().is_terminal() || std::io::stderr().is_terminal()
}

/// Perform this expensive operation as a normal Rust function, but if it takes
/// more than a certain amount of time, display a message to the user that
/// you're still waiting for this operation to complete. Deconvolution engine
/// runs can take hours.
pub(crate) fn expensive_op<F, R>(func: F, wait_message: &str) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    use std::time::Duration;

    const INITIAL_WAIT_TIME: Duration = Duration::from_secs(5);
    const INC_WAIT_TIME: Duration = Duration::from_millis(500);

    let (tx, rx) = bounded(1);

    thread::scope(|s| {
        s.spawn(|| {
            let r = func();
            tx.send(r).expect("receiver is not disconnected");
        });

        // Only print messages if we're in an interactive terminal.
        let term = is_a_tty().then(Term::stderr);

        let mut total_wait_time = Duration::from_secs(0);
        let mut printed_wait_line = false;
        // Loop forever until the return value is ready.
        loop {
            match rx.recv_timeout(INC_WAIT_TIME) {
                // If the channel received a value, then we need to clean up
                // before returning it to the caller.
                Ok(r) => {
                    // Clear the waiting line.
                    if let Some(term) = term.as_ref() {
                        if let Err(e) = update_wait_line(term, printed_wait_line, None) {
                            trace!("Couldn't clear the wait line: {e}");
                        }
                    }

                    return r;
                }
                // Otherwise we must wait longer.
                Err(_) => {
                    total_wait_time += INC_WAIT_TIME;
                    if let Some(term) = term.as_ref() {
                        if total_wait_time >= INITIAL_WAIT_TIME {
                            let line = format!(
                                "{wait_message}: {:.1}s",
                                total_wait_time.as_secs_f64()
                            );
                            match update_wait_line(term, printed_wait_line, Some(&line)) {
                                Ok(()) => printed_wait_line = true,
                                Err(e) => trace!("Couldn't write the wait line: {e}"),
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_round_to_sig_figs() {
        assert_abs_diff_eq!(round_to_sig_figs(0.0123456, 2), 0.012);
        assert_abs_diff_eq!(round_to_sig_figs(123456.0, 2), 120000.0);
        assert_abs_diff_eq!(round_to_sig_figs(-0.0456, 1), -0.05);
        assert_abs_diff_eq!(round_to_sig_figs(0.0, 3), 0.0);
        assert_eq!(format_sig_figs(0.000123456, 3), "0.000123");
        assert_eq!(format_sig_figs(2.0, 3), "2");
    }

    #[test]
    fn test_update_wait_line() {
        let term = Term::buffered_stderr();
        update_wait_line(&term, false, Some("Still waiting: 2.0s")).unwrap();
        update_wait_line(&term, true, Some("Still waiting: 2.3s")).unwrap();
        update_wait_line(&term, true, None).unwrap();
    }

    #[test]
    fn test_expensive_op_returns_value() {
        let r = expensive_op(|| 2 + 2, "Waiting");
        assert_eq!(r, 4);
    }
}
