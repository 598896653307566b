use crate::error::ParseError;
use crate::health::Thresholds;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};

const STATUS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The Nagios service checks this system understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    CpuUsage,
    MemoryUsage,
    DiskUsageRoot,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::CpuUsage,
        ServiceKind::MemoryUsage,
        ServiceKind::DiskUsageRoot,
    ];

    /// The exact `service_description` used by Nagios, which is also the
    /// metric name of the produced records.
    pub fn description(&self) -> &'static str {
        match self {
            ServiceKind::CpuUsage => "CPU Usage",
            ServiceKind::MemoryUsage => "Memory Usage",
            ServiceKind::DiskUsageRoot => "Disk Usage on /",
        }
    }

    pub fn unit(&self) -> &'static str {
        "%"
    }
}

/// One entry of the `servicestatus` array returned by the status API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceStatus {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub service_description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub perfdata: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub output: String,
    #[serde(default, deserialize_with = "deserialize_state")]
    pub current_state: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status_update_time: String,
    #[serde(default)]
    pub check_command: Option<String>,
    #[serde(default)]
    pub host_address: Option<String>,
}

/// The status API sends `null` for text fields a check never filled in.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `current_state` arrives as `"0"` from some API versions and `0` from others.
fn deserialize_state<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StateInput {
        Text(String),
        Number(i64),
        Null(()),
    }

    match StateInput::deserialize(deserializer)? {
        StateInput::Text(s) => Ok(s),
        StateInput::Number(n) => Ok(n.to_string()),
        StateInput::Null(()) => Ok(String::new()),
    }
}

/// Where a sample's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Perfdata,
    Output,
    /// `used / total * 100` from disk perfdata.
    Computed,
    /// Nothing matched; the value is a placeholder 0.0.
    Default,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::Perfdata => "perfdata",
            ValueSource::Output => "output",
            ValueSource::Computed => "computed",
            ValueSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub value: f64,
    pub unit: &'static str,
    pub thresholds: Thresholds,
    pub source: ValueSource,
    pub timestamp: DateTime<Utc>,
}

pub struct PerfdataParser {
    percent: Regex,
    output_percent: Regex,
    used: Regex,
    total: Regex,
    warning_flag: Regex,
    critical_flag: Regex,
}

impl PerfdataParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            percent: Regex::new(r"'percent'=([0-9.]+)%;([0-9.]*);([0-9.]*)")?,
            output_percent: Regex::new(r"was\s+([0-9.]+)\s+%")?,
            used: Regex::new(r"'used'=([0-9.]+)")?,
            total: Regex::new(r"'total'=([0-9.]+)")?,
            warning_flag: Regex::new(r"-w\s+'?([0-9.]+)'?")?,
            critical_flag: Regex::new(r"-c\s+'?([0-9.]+)'?")?,
        })
    }

    pub fn parse(&self, kind: ServiceKind, status: &ServiceStatus) -> Result<ParsedSample, ParseError> {
        let timestamp = parse_status_time(&status.status_update_time)?;

        let (value, source, warning, critical) = match kind {
            ServiceKind::CpuUsage | ServiceKind::MemoryUsage => self.parse_percent(status)?,
            ServiceKind::DiskUsageRoot => self.parse_disk(status)?,
        };

        let defaults = Thresholds::defaults_for(kind.description());
        let thresholds = Thresholds {
            warning: warning.unwrap_or(defaults.warning),
            critical: critical.unwrap_or(defaults.critical),
        };

        Ok(ParsedSample {
            value,
            unit: kind.unit(),
            thresholds,
            source,
            timestamp,
        })
    }

    /// `'percent'=V%;W;C` in perfdata, else `was V %` in output.
    fn parse_percent(
        &self,
        status: &ServiceStatus,
    ) -> Result<(f64, ValueSource, Option<f64>, Option<f64>), ParseError> {
        if let Some(caps) = self.percent.captures(&status.perfdata) {
            let value = parse_number("perfdata", &caps[1])?;
            let warning = parse_optional("perfdata", &caps[2])?;
            let critical = parse_optional("perfdata", &caps[3])?;
            return Ok((value, ValueSource::Perfdata, warning, critical));
        }

        match self.output_percent.captures(&status.output) {
            Some(caps) => Ok((parse_number("output", &caps[1])?, ValueSource::Output, None, None)),
            None => Ok((0.0, ValueSource::Default, None, None)),
        }
    }

    /// `was V %` in output, else `used/total*100` from perfdata. Thresholds
    /// come from the `-w`/`-c` flags of the check command.
    fn parse_disk(
        &self,
        status: &ServiceStatus,
    ) -> Result<(f64, ValueSource, Option<f64>, Option<f64>), ParseError> {
        let (value, source) = if let Some(caps) = self.output_percent.captures(&status.output) {
            (parse_number("output", &caps[1])?, ValueSource::Output)
        } else {
            match (
                self.used.captures(&status.perfdata),
                self.total.captures(&status.perfdata),
            ) {
                (Some(used), Some(total)) => {
                    let used = parse_number("perfdata", &used[1])?;
                    let total = parse_number("perfdata", &total[1])?;
                    if total > 0.0 {
                        (used / total * 100.0, ValueSource::Computed)
                    } else {
                        (0.0, ValueSource::Default)
                    }
                }
                _ => (0.0, ValueSource::Default),
            }
        };

        let (warning, critical) = match status.check_command.as_deref() {
            Some(command) => (
                self.flag(&self.warning_flag, command)?,
                self.flag(&self.critical_flag, command)?,
            ),
            None => (None, None),
        };

        Ok((value, source, warning, critical))
    }

    fn flag(&self, pattern: &Regex, command: &str) -> Result<Option<f64>, ParseError> {
        pattern
            .captures(command)
            .map(|caps| parse_number("check_command", &caps[1]))
            .transpose()
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        field,
        raw: raw.to_string(),
    })
}

fn parse_optional(field: &'static str, raw: &str) -> Result<Option<f64>, ParseError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_number(field, raw).map(Some)
    }
}

/// Parses `yyyy-MM-dd HH:mm:ss` as local wall-clock time. An ambiguous time
/// (DST fold) resolves to the earlier instant.
pub fn parse_status_time(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), STATUS_TIME_FORMAT).map_err(|source| {
        ParseError::InvalidTimestamp {
            raw: raw.to_string(),
            source,
        }
    })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ParseError::NonexistentLocalTime { raw: raw.to_string() })
}
