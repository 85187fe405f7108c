//! Thin wrapper around the `cron` crate for computing a job's next fire
//! time in UTC, used by the dispatcher when advancing a recurring job's
//! `executeAt` after publishing (see `ScheduledJob::is_recurring`).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::{Error, Result};

/// Parse `expression` and return the first fire time strictly after
/// `after`, in UTC. `expression` follows the `cron` crate's seven-field
/// grammar (seconds field included).
pub fn next_fire_after(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(expression)
        .map_err(|err| Error::validation(format!("invalid cron expression '{expression}': {err}")))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::validation(format!("cron expression '{expression}' has no future occurrence")))
}

/// Validate a cron expression without computing a fire time, used when a
/// job definition is created or updated.
pub fn validate(expression: &str) -> Result<()> {
    Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|err| Error::validation(format!("invalid cron expression '{expression}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn computes_next_fire_strictly_after_given_time() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = next_fire_after("0 0 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(validate("not a cron expression").is_err());
    }
}
