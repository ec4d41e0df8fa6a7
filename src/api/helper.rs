use crate::errors::AppError;
use crate::model::stats::{TimeBucket, TimeRange};
use crate::payloads::stats::TimeRangeParams;
use axum::extract::Query;
use axum::extract::rejection::QueryRejection;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::warn;

const MAX_IDENTIFIER_LEN: usize = 50;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Student, course and task ids are 1 to 50 ASCII letters or digits.
pub(super) fn validate_identifier(field: &str, value: &str) -> Result<(), AppError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric());

    if valid {
        Ok(())
    } else {
        warn!("Rejected {} '{}'", field, value);
        Err(AppError::BadRequest(format!(
            "Invalid {}: must be 1-{} letters or digits",
            field, MAX_IDENTIFIER_LEN
        )))
    }
}

pub(super) fn validate_identifiers(fields: &[(&str, &str)]) -> Result<(), AppError> {
    fields
        .iter()
        .try_for_each(|(field, value)| validate_identifier(field, value))
}

/// Unwraps a query string, turning a rejection into a JSON 400.
pub(super) fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    match params {
        Ok(Query(params)) => Ok(params),
        Err(rejection) => {
            warn!("Rejected query string: {}", rejection.body_text());
            Err(AppError::BadRequest(format!(
                "Invalid query parameters: {}",
                rejection.body_text()
            )))
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
        AppError::BadRequest(format!("Invalid {} '{}'. Use YYYY-MM-DD", field, raw))
    })
}

/// `start_date` opens at the start of its UTC day, `end_date` closes at the last
/// microsecond of its UTC day. Missing dates leave that side unbounded.
pub(super) fn parse_time_range(params: &TimeRangeParams) -> Result<TimeRange, AppError> {
    let start = non_empty(params.start_date.as_ref())
        .map(|raw| parse_date("start_date", raw))
        .transpose()?
        .map(|date| date.and_time(NaiveTime::MIN).and_utc());

    let end = non_empty(params.end_date.as_ref())
        .map(|raw| parse_date("end_date", raw))
        .transpose()?
        .map(end_of_day)
        .transpose()?;

    Ok(TimeRange { start, end })
}

fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>, AppError> {
    date.and_hms_micro_opt(23, 59, 59, 999_999)
        .map(|at| at.and_utc())
        .ok_or_else(|| AppError::BadRequest(format!("Invalid end_date '{}'", date)))
}

/// An absent or empty `group_by` yields `None`.
pub(super) fn parse_group_by(params: &TimeRangeParams) -> Result<Option<TimeBucket>, AppError> {
    non_empty(params.group_by.as_ref())
        .map(|raw| raw.parse::<TimeBucket>().map_err(AppError::BadRequest))
        .transpose()
}
