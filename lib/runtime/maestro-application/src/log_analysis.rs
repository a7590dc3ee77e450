//! Collector health from the tail of its logs.
//!
//! Collector log lines are tab separated: timestamp, level, caller, message
//! and a JSON object with structured fields.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use maestro_domain::HealthState;

const TIMESTAMP_LEN: usize = 24;
const JSON_FIELD: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Active,
    Idle,
    Warning(String),
    Error(String),
    /// The logs could not be read; never published.
    Fail(String),
}

impl Classification {
    pub fn health(&self) -> Option<HealthState> {
        match self {
            Classification::Active => Some(HealthState::Active),
            Classification::Idle => Some(HealthState::Idle),
            Classification::Warning(_) => Some(HealthState::Warning),
            Classification::Error(_) => Some(HealthState::Error),
            Classification::Fail(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Classification::Active | Classification::Idle => "",
            Classification::Warning(msg) | Classification::Error(msg) | Classification::Fail(msg) => {
                msg
            }
        }
    }
}

enum ErrorLine {
    Found(Classification),
    NoErrorKey,
}

fn error_line(line: &str) -> ErrorLine {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() <= JSON_FIELD {
        return ErrorLine::Found(Classification::Fail(format!(
            "error line has {} tab-separated fields",
            fields.len()
        )));
    }
    let payload = fields[JSON_FIELD..].join("\t");
    let json: Value = match serde_json::from_str(&payload) {
        Ok(json) => json,
        Err(e) => {
            return ErrorLine::Found(Classification::Fail(format!(
                "error line payload is not JSON: {e}"
            )));
        }
    };
    match json.get("error") {
        None => ErrorLine::NoErrorKey,
        Some(error) => {
            let msg = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            if msg.contains("429") {
                ErrorLine::Found(Classification::Warning(msg))
            } else {
                ErrorLine::Found(Classification::Error(msg))
            }
        }
    }
}

/// Classifies a log tail. Pure: the result depends only on the arguments.
pub fn classify(logs: &str, now: DateTime<Utc>, idle_threshold: TimeDelta) -> Classification {
    for line in logs.lines() {
        if line.len() > TIMESTAMP_LEN && line.contains("error") {
            if let ErrorLine::Found(classification) = error_line(line) {
                return classification;
            }
        }
    }

    let Some(last) = logs.lines().rev().find(|line| !line.trim().is_empty()) else {
        return Classification::Fail("no log lines".to_string());
    };
    let Some(stamp) = last.get(..TIMESTAMP_LEN) else {
        return Classification::Fail(format!("last log line too short: {last:?}"));
    };
    let at = match DateTime::parse_from_rfc3339(stamp) {
        Ok(at) => at.with_timezone(&Utc),
        Err(e) => return Classification::Fail(format!("bad log timestamp {stamp:?}: {e}")),
    };

    if now - at > idle_threshold {
        Classification::Idle
    } else {
        Classification::Active
    }
}
