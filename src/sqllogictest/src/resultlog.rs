// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Reparses verdict logs emitted by the runner, for downstream aggregation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, FixedOffset};

use crate::runner::Outcome;

const NOT_OK_MARKER: &str = " not ok: ";

/// One reparsed verdict line. A `NotOk` outcome carries its error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLogEntry {
    pub entry_time: DateTime<FixedOffset>,
    pub duration: Duration,
    pub test_file: String,
    pub line_num: usize,
    pub query: String,
    pub outcome: Outcome,
}

/// Parses a result log file produced by the runner, in emission order.
pub fn parse_result_file(path: &Path) -> Result<Vec<ResultLogEntry>, anyhow::Error> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_result_log(&contents)
}

/// Parses result log text. Lines that do not begin with a parseable
/// timestamp and millisecond duration are assumed to be interleaved
/// non-log noise and skipped; log lines that are otherwise malformed are a
/// hard error.
pub fn parse_result_log(contents: &str) -> Result<Vec<ResultLogEntry>, anyhow::Error> {
    let mut entries = vec![];
    for (i, line) in contents.lines().enumerate() {
        if let Some(entry) =
            parse_log_line(line).map_err(|err| anyhow!("log line {}: {}", i + 1, err))?
        {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn parse_log_line(line: &str) -> Result<Option<ResultLogEntry>, anyhow::Error> {
    // <RFC3339Nano> <duration_ms> <path>:<line>: <query> <verdict>
    let Some((timestamp, rest)) = line.split_once(' ') else {
        return Ok(None);
    };
    let Ok(entry_time) = DateTime::parse_from_rfc3339(timestamp) else {
        return Ok(None);
    };
    let Some((millis, rest)) = rest.split_once(' ') else {
        return Ok(None);
    };
    let Ok(millis) = millis.parse::<u64>() else {
        return Ok(None);
    };
    let duration = Duration::from_millis(millis);

    let Some(colon) = rest.find(':') else {
        bail!("malformed log line: {}", line);
    };
    let test_file = rest[..colon].to_owned();
    let rest = &rest[colon + 1..];
    let Some(colon) = rest.find(':') else {
        bail!("malformed log line: {}", line);
    };
    let line_num = rest[..colon]
        .parse::<usize>()
        .with_context(|| format!("parsing record line number in: {}", line))?;
    let rest = rest[colon + 1..].strip_prefix(' ').unwrap_or(&rest[colon + 1..]);

    // Classification order matters: a `not ok` line must not be mistaken
    // for a bare `ok` suffix.
    let (query, outcome) = if let Some(idx) = rest.find(NOT_OK_MARKER) {
        let message = rest[idx + NOT_OK_MARKER.len()..].to_owned();
        (&rest[..idx], Outcome::NotOk(message))
    } else if let Some(query) = rest.strip_suffix(" ok") {
        (query, Outcome::Ok)
    } else if let Some(query) = rest.strip_suffix(" timeout") {
        (query, Outcome::Timeout)
    } else if let Some(query) = rest.strip_suffix(" skipped") {
        (query, Outcome::Skipped)
    } else if let Some(query) = rest.strip_suffix(" did not run") {
        (query, Outcome::DidNotRun)
    } else {
        bail!("couldn't determine result of log line: {}", line);
    };

    Ok(Some(ResultLogEntry {
        entry_time,
        duration,
        test_file,
        line_num,
        query: query.to_owned(),
        outcome,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_parse_result_log() {
        let log = "\
2019-10-16T16:02:18.3408696-07:00 213 evidence/in1.test:25: SELECT 1 IN () skipped
2019-10-16T16:02:18.3418683-07:00 789 evidence/in1.test:30: SELECT 1 IN (2) ok
2019-10-16T16:02:18.3418683-07:00 123 evidence/in1.test:35: SELECT 1 IN (2,3,4,5,6,7,8,9) ok
2019-10-16T16:02:18.3428692-07:00 878 evidence/in1.test:68: CREATE TABLE t1(x INTEGER) not ok: Unexpected error no primary key columns
2019-10-16T16:02:18.3428692-07:00 98 evidence/in1.test:72: SELECT 1 IN t1 timeout
2019-10-16T16:02:18.3428692-07:00 99 evidence/in1.test:75: SELECT 2 IN t1 did not run
";
        let entries = parse_result_log(log).unwrap();
        assert_eq!(
            entries,
            vec![
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3408696-07:00"),
                    duration: Duration::from_millis(213),
                    test_file: "evidence/in1.test".into(),
                    line_num: 25,
                    query: "SELECT 1 IN ()".into(),
                    outcome: Outcome::Skipped,
                },
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3418683-07:00"),
                    duration: Duration::from_millis(789),
                    test_file: "evidence/in1.test".into(),
                    line_num: 30,
                    query: "SELECT 1 IN (2)".into(),
                    outcome: Outcome::Ok,
                },
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3418683-07:00"),
                    duration: Duration::from_millis(123),
                    test_file: "evidence/in1.test".into(),
                    line_num: 35,
                    query: "SELECT 1 IN (2,3,4,5,6,7,8,9)".into(),
                    outcome: Outcome::Ok,
                },
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3428692-07:00"),
                    duration: Duration::from_millis(878),
                    test_file: "evidence/in1.test".into(),
                    line_num: 68,
                    query: "CREATE TABLE t1(x INTEGER)".into(),
                    outcome: Outcome::NotOk("Unexpected error no primary key columns".into()),
                },
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3428692-07:00"),
                    duration: Duration::from_millis(98),
                    test_file: "evidence/in1.test".into(),
                    line_num: 72,
                    query: "SELECT 1 IN t1".into(),
                    outcome: Outcome::Timeout,
                },
                ResultLogEntry {
                    entry_time: time("2019-10-16T16:02:18.3428692-07:00"),
                    duration: Duration::from_millis(99),
                    test_file: "evidence/in1.test".into(),
                    line_num: 75,
                    query: "SELECT 2 IN t1".into(),
                    outcome: Outcome::DidNotRun,
                },
            ]
        );
    }

    #[test]
    fn test_noise_lines_skipped() {
        let log = "\
--- starting run
2019-10-16T16:02:18.3418683-07:00 789 evidence/in1.test:30: SELECT 1 IN (2) ok
warning: something unrelated
ok=1, not-ok=0, skipped=0, timeout=0, did-not-run=0, total=1
";
        let entries = parse_result_log(log).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, Outcome::Ok);
    }

    #[test]
    fn test_malformed_line_is_hard_error() {
        // A valid timestamp and duration followed by garbage is not noise.
        let log = "2019-10-16T16:02:18.3418683-07:00 789 no separators here\n";
        let err = parse_result_log(log).unwrap_err();
        assert!(err.to_string().contains("malformed log line"));

        let log = "2019-10-16T16:02:18.3418683-07:00 789 a.test:30: SELECT 1 IN (2) exploded\n";
        let err = parse_result_log(log).unwrap_err();
        assert!(err.to_string().contains("couldn't determine result"));
    }

    #[test]
    fn test_utc_timestamps_accepted() {
        let log = "2026-08-02T09:00:00.000000001Z 5 a.test:1: SELECT 1 ok\n";
        let entries = parse_result_log(log).unwrap();
        assert_eq!(entries[0].line_num, 1);
        assert_eq!(entries[0].duration, Duration::from_millis(5));
    }
}
