//! Scheduling window normalization and resource-name templating.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use regex::{Captures, Regex};
use serde::Serialize;

/// Placeholder prepended to order and line item names, rendered per run mode.
pub const RUN_MODE_PLACEHOLDER: &str = "{{ run_mode }}";

/// Start of a line item's flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartTime {
    Immediately,
    At(DateTime<Tz>),
}

/// End of a line item's flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndTime {
    Unlimited,
    At(DateTime<Tz>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: StartTime,
    pub end: EndTime,
    pub timezone: Tz,
}

impl ScheduleWindow {
    pub fn starts_immediately(&self) -> bool {
        matches!(self.start, StartTime::Immediately)
    }

    pub fn unlimited_end(&self) -> bool {
        matches!(self.end, EndTime::Unlimited)
    }

    /// Platform start type token.
    pub fn start_type(&self) -> &'static str {
        match self.start {
            StartTime::Immediately => "IMMEDIATELY",
            StartTime::At(_) => "USE_START_DATE_TIME",
        }
    }
}

impl Serialize for ScheduleWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ScheduleWindow", 5)?;
        state.serialize_field("start_dt_type", self.start_type())?;
        state.serialize_field(
            "start_dt",
            &match &self.start {
                StartTime::Immediately => None,
                StartTime::At(dt) => Some(dt.to_rfc3339()),
            },
        )?;
        state.serialize_field(
            "end_dt",
            &match &self.end {
                EndTime::Unlimited => None,
                EndTime::At(dt) => Some(dt.to_rfc3339()),
            },
        )?;
        state.serialize_field("unlimited_end_dt", &self.unlimited_end())?;
        state.serialize_field("timezone", self.timezone.name())?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    UnknownTimeZone(String),
    Unparseable {
        field: &'static str,
        value: String,
        format: String,
        reason: String,
    },
    NonexistentLocalTime {
        field: &'static str,
        value: String,
    },
    EndBeforeStart,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::UnknownTimeZone(zone) => write!(f, "Unknown Time Zone, '{zone}'"),
            ScheduleError::Unparseable {
                field,
                value,
                format,
                reason,
            } => write!(
                f,
                "Unable to parse {field} '{value}' with format '{format}': {reason}"
            ),
            ScheduleError::NonexistentLocalTime { field, value } => {
                write!(f, "{field} '{value}' does not exist in the configured time zone")
            }
            ScheduleError::EndBeforeStart => write!(f, "end_datetime must be after start_datetime"),
        }
    }
}

impl std::error::Error for ScheduleError {}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimeZone(name.to_string()))
}

/// Build the flight window from optional raw strings.
///
/// The zone is checked first so an unknown zone fails even when both bounds are absent.
pub fn normalize_schedule(
    start: Option<&str>,
    end: Option<&str>,
    format: &str,
    timezone: &str,
) -> Result<ScheduleWindow, ScheduleError> {
    let tz = parse_timezone(timezone)?;

    let start = match non_blank(start) {
        None => StartTime::Immediately,
        Some(raw) => StartTime::At(parse_in_zone("start_datetime", raw, format, tz)?),
    };
    let end = match non_blank(end) {
        None => EndTime::Unlimited,
        Some(raw) => EndTime::At(parse_in_zone("end_datetime", raw, format, tz)?),
    };

    if let (StartTime::At(s), EndTime::At(e)) = (&start, &end) {
        if e <= s {
            return Err(ScheduleError::EndBeforeStart);
        }
    }

    Ok(ScheduleWindow {
        start,
        end,
        timezone: tz,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_in_zone(
    field: &'static str,
    raw: &str,
    format: &str,
    tz: Tz,
) -> Result<DateTime<Tz>, ScheduleError> {
    let naive = NaiveDateTime::parse_from_str(raw, format).map_err(|err| {
        ScheduleError::Unparseable {
            field,
            value: raw.to_string(),
            format: format.to_string(),
            reason: err.to_string(),
        }
    })?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt),
        // fall-back hour: take the earlier instant
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => Err(ScheduleError::NonexistentLocalTime {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Prefix a resource name with the run-mode placeholder unless it already carries one.
pub fn with_run_mode_placeholder(name: &str) -> String {
    if placeholder_regex()
        .captures_iter(name)
        .any(|caps| &caps[1] == "run_mode")
    {
        return name.to_string();
    }
    format!("{RUN_MODE_PLACEHOLDER}{name}")
}

/// Text the run-mode placeholder renders to.
pub fn run_mode_text(test_run: bool, test_prefix: &str) -> &str {
    if test_run { test_prefix } else { "" }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ name }}` placeholders; unknown names are left untouched.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Render every string leaf of a JSON tree.
pub fn render_value(value: &serde_json::Value, vars: &HashMap<&str, String>) -> serde_json::Value {
    match value {
        serde_json::Value::String(text) => serde_json::Value::String(render_template(text, vars)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| render_value(item, vars)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}
