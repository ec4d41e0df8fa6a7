use serde::Deserialize;

/// Query string shared by the time-series and on-time endpoints.
/// Dates are `YYYY-MM-DD`; empty values count as absent.
#[derive(Deserialize, Debug, Default)]
pub struct TimeRangeParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub group_by: Option<String>,
}
