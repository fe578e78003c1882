use chrono::{Local, NaiveDateTime};

use crate::error::AppError;
use crate::models::RegistrationSettings;

const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

fn parse_local(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// The period during which parents may submit, in the school's local time.
/// An end that is missing or unparseable leaves that side unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrationWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl RegistrationWindow {
    pub fn from_settings(settings: &RegistrationSettings) -> Self {
        Self {
            start: parse_local(&settings.start),
            end: parse_local(&settings.end),
        }
    }

    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        let started = self.start.is_none_or(|start| start <= now);
        let not_ended = self.end.is_none_or(|end| now <= end);
        started && not_ended
    }

    pub fn ensure_open_now(&self) -> Result<(), AppError> {
        let now = Local::now().naive_local();
        if self.is_open(now) {
            return Ok(());
        }

        let message = match self.start {
            Some(start) if now < start => "Registration has not opened yet",
            _ => "Registration has closed",
        };
        Err(AppError::Validation(message.to_string()))
    }
}
