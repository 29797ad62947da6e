//! Bounded retry for connection-refused failures
//!
//! Re-attempts an operation only while it keeps failing because the peer
//! refused the connection. Any other failure is returned on the spot.

use std::io;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use tracing::debug;

use crate::error::Error;

/// Classifies errors that mean "the peer actively refused the connection"
pub trait ConnRefused {
    fn is_conn_refused(&self) -> bool;
}

impl ConnRefused for io::Error {
    fn is_conn_refused(&self) -> bool {
        self.kind() == io::ErrorKind::ConnectionRefused
    }
}

impl ConnRefused for Errno {
    fn is_conn_refused(&self) -> bool {
        *self == Errno::ECONNREFUSED
    }
}

impl ConnRefused for Error {
    fn is_conn_refused(&self) -> bool {
        Error::is_conn_refused(self)
    }
}

/// Call `f` up to `max_attempts` times, sleeping `delay` between attempts,
/// for as long as it fails with a connection-refused error.
///
/// Returns the first success, the first non-refused error, or the last
/// refused error once attempts are exhausted. Errors are returned as-is.
/// A `max_attempts` of zero still makes one call.
pub fn retry_on_conn_err<T, E, F>(max_attempts: u32, delay: Duration, mut f: F) -> Result<T, E>
where
    E: ConnRefused,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conn_refused() && attempt < max_attempts => {
                debug!(attempt, max_attempts, ?delay, "connection refused, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const DELAY: Duration = Duration::from_millis(1);

    #[test]
    fn test_retries_specified_number_of_times() {
        let mut calls = 0;
        let result: Result<(), Errno> = retry_on_conn_err(3, DELAY, || {
            calls += 1;
            Err(Errno::ECONNREFUSED)
        });

        assert_eq!(calls, 3);
        assert_eq!(result, Err(Errno::ECONNREFUSED));
    }

    #[test]
    fn test_stops_once_func_succeeds() {
        let mut calls = 0;
        let result: Result<(), Errno> = retry_on_conn_err(4, DELAY, || {
            calls += 1;
            if calls >= 3 { Ok(()) } else { Err(Errno::ECONNREFUSED) }
        });

        assert_eq!(calls, 3);
        assert!(result.is_ok());
    }

    #[test]
    fn test_single_call_on_success() {
        let mut calls = 0;
        let result: Result<u32, Errno> = retry_on_conn_err(3, DELAY, || {
            calls += 1;
            Ok(42)
        });

        assert_eq!(calls, 1);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let start = Instant::now();
        let result: Result<(), Errno> = retry_on_conn_err(10, Duration::from_secs(5), || {
            calls += 1;
            Err(Errno::ETIMEDOUT)
        });

        assert_eq!(calls, 1);
        assert_eq!(result, Err(Errno::ETIMEDOUT));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut calls = 0;
        let result: Result<(), Errno> = retry_on_conn_err(1, DELAY, || {
            calls += 1;
            Err(Errno::ECONNREFUSED)
        });

        assert_eq!(calls, 1);
        assert_eq!(result, Err(Errno::ECONNREFUSED));
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let mut calls = 0;
        let _: Result<(), Errno> = retry_on_conn_err(0, DELAY, || {
            calls += 1;
            Err(Errno::ECONNREFUSED)
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_io_errors_are_classified() {
        let mut calls = 0;
        let result: Result<(), io::Error> = retry_on_conn_err(2, DELAY, || {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        });

        assert_eq!(calls, 2);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_crate_errors_are_classified() {
        let mut calls = 0;
        let result: Result<(), Error> = retry_on_conn_err(5, DELAY, || {
            calls += 1;
            if calls == 1 {
                Err(Error::Errno(Errno::ECONNREFUSED))
            } else {
                Err(Error::MountNotFound("projects".into()))
            }
        });

        assert_eq!(calls, 2);
        assert!(matches!(result, Err(Error::MountNotFound(name)) if name == "projects"));
    }

    #[test]
    fn test_delay_only_between_attempts() {
        let delay = Duration::from_millis(300);
        let start = Instant::now();
        let _: Result<(), Errno> = retry_on_conn_err(3, delay, || Err(Errno::ECONNREFUSED));

        // Two pauses for three attempts, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= delay * 2);
        assert!(elapsed < delay * 3);
    }

    #[test]
    fn test_no_delay_after_final_attempt() {
        let start = Instant::now();
        let result: Result<(), Errno> =
            retry_on_conn_err(1, Duration::from_secs(5), || Err(Errno::ECONNREFUSED));

        assert_eq!(result, Err(Errno::ECONNREFUSED));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
