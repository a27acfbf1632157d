//! Blocks startup until a dependent service accepts an idempotent probe.

use std::fmt::Display;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::error::StartupError;
use crate::invocation::{CommandRunner, Invocation};

/// Fixed-backoff retry loop around a readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    pub interval: Duration,
    /// `None` waits forever.
    pub max_attempts: Option<u32>,
}

impl ReadinessGate {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Polls `probe` until it succeeds, sleeping `interval` between attempts.
    ///
    /// The probe may run any number of times and must not have side effects
    /// beyond what an idempotent check implies.
    ///
    /// # Errors
    /// Returns [`StartupError::ReadinessTimeout`] once `max_attempts` probes
    /// have failed.
    pub fn wait_until_ready<P, E>(&self, probe: P) -> Result<u32, StartupError>
    where
        P: FnMut() -> Result<(), E>,
        E: Display,
    {
        self.wait_until_ready_with(probe, std::thread::sleep)
    }

    /// Same as [`Self::wait_until_ready`] with an explicit sleep function.
    ///
    /// Returns the number of probe invocations it took to succeed.
    #[instrument(skip_all, fields(interval = ?self.interval, max_attempts = ?self.max_attempts))]
    pub fn wait_until_ready_with<P, E, S>(
        &self,
        mut probe: P,
        mut sleep: S,
    ) -> Result<u32, StartupError>
    where
        P: FnMut() -> Result<(), E>,
        E: Display,
        S: FnMut(Duration),
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match probe() {
                Ok(()) => {
                    info!(attempt, "dependency is ready");
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            if self.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(StartupError::ReadinessTimeout {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            warn!(attempt, error = %err, "dependency unavailable, retrying");
            sleep(self.interval);
        }
    }

    /// Polls by running `probe` as a command until it exits successfully.
    pub fn wait_for_command<R: CommandRunner>(
        &self,
        runner: &mut R,
        probe: &Invocation,
    ) -> Result<u32, StartupError> {
        info!(probe = %probe, "waiting for dependency");
        self.wait_until_ready(|| runner.run(probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;

    #[test]
    fn fails_after_exactly_max_attempts() {
        for max in 1..=5u32 {
            let gate = ReadinessGate::new(Duration::from_secs(2), Some(max));
            let mut probes = 0u32;
            let mut sleeps = Vec::new();

            let err = gate
                .wait_until_ready_with(
                    || {
                        probes += 1;
                        Err::<(), _>("connection refused")
                    },
                    |d| sleeps.push(d),
                )
                .expect_err("never-ready probe must time out");

            assert_eq!(probes, max);
            assert_eq!(sleeps.len() as u32, max - 1);
            assert!(sleeps.iter().all(|d| *d == Duration::from_secs(2)));
            match err {
                StartupError::ReadinessTimeout {
                    attempts,
                    last_error,
                } => {
                    assert_eq!(attempts, max);
                    assert_eq!(last_error, "connection refused");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let gate = ReadinessGate::new(Duration::from_secs(5), Some(10));
        let mut probes = 0;
        let mut sleeps = Vec::new();

        let attempts = gate
            .wait_until_ready_with(
                || {
                    probes += 1;
                    if probes < 3 {
                        Err("not yet")
                    } else {
                        Ok(())
                    }
                },
                |d| sleeps.push(d),
            )
            .expect("third probe succeeds");

        assert_eq!(attempts, 3);
        assert_eq!(sleeps, vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn unbounded_gate_keeps_trying() {
        let gate = ReadinessGate::new(Duration::ZERO, None);
        let mut probes = 0;
        let attempts = gate
            .wait_until_ready_with(
                || {
                    probes += 1;
                    if probes == 50 {
                        Ok(())
                    } else {
                        Err("down")
                    }
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(attempts, 50);
    }

    #[test]
    fn command_probe_uses_runner() {
        let gate = ReadinessGate::new(Duration::from_millis(1), Some(3));
        let mut calls = Vec::new();
        let mut runner = |inv: &Invocation| -> Result<(), InvocationError> {
            calls.push(inv.command_line());
            Err(InvocationError::Empty)
        };
        let probe = Invocation::new("python", ["manage.py", "check"]);

        let err = gate.wait_for_command(&mut runner, &probe).unwrap_err();
        assert!(matches!(err, StartupError::ReadinessTimeout { attempts: 3, .. }));
        assert_eq!(calls, vec!["python manage.py check"; 3]);
    }
}
