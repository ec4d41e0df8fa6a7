use chrono::{DateTime, SecondsFormat, Utc};
use diesel::QueryableByName;
use diesel::sql_types::{BigInt, Double, Text, Timestamptz};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const ALL_TIME: &str = "all_time";

/// Granularity used to truncate `created_at` when grouping rows over time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeBucket {
    /// The `date_trunc` field name for this bucket.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Day => "day",
            TimeBucket::Week => "week",
            TimeBucket::Month => "month",
            TimeBucket::Quarter => "quarter",
            TimeBucket::Year => "year",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(TimeBucket::Day),
            "week" => Ok(TimeBucket::Week),
            "month" => Ok(TimeBucket::Month),
            "quarter" => Ok(TimeBucket::Quarter),
            "year" => Ok(TimeBucket::Year),
            other => Err(format!(
                "Invalid group_by '{}'. Use one of: day, week, month, quarter, year",
                other
            )),
        }
    }
}

/// Inclusive bounds on `created_at`; `None` leaves that side open.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Which course grades a time series is computed over.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeScope {
    Student(String),
    Course(String),
}

/// Which task grades an on-time percentage is computed over.
#[derive(Debug, Clone, PartialEq)]
pub enum OnTimeScope {
    Course {
        course_id: String,
    },
    CourseStudent {
        course_id: String,
        student_id: String,
    },
}

/// Outcome of a single-scalar average query. Zero matching rows is
/// `NotFound`, never an average of 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Average {
    Found(f64),
    NotFound,
}

impl Average {
    pub fn found(self) -> Option<f64> {
        match self {
            Average::Found(value) => Some(value),
            Average::NotFound => None,
        }
    }
}

impl From<Option<f64>> for Average {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Average::NotFound, Average::Found)
    }
}

mod bucket_format {
    use super::*;

    pub(super) fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub(super) fn parse<E: serde::de::Error>(raw: &str) -> Result<DateTime<Utc>, E> {
        DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(E::custom)
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
    }
}

/// The `period` of an on-time row: either the whole range or one time bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Period {
    AllTime,
    Bucket(DateTime<Utc>),
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Period::AllTime => serializer.serialize_str(ALL_TIME),
            Period::Bucket(at) => serializer.serialize_str(&bucket_format::format(at)),
        }
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == ALL_TIME {
            return Ok(Period::AllTime);
        }
        bucket_format::parse::<D::Error>(&raw)
            .map(Period::Bucket)
            .map_err(|e| D::Error::custom(format!("invalid period '{}': {}", raw, e)))
    }
}

#[derive(Serialize, Deserialize, QueryableByName, Debug, Clone, PartialEq)]
pub struct BucketAverage {
    #[serde(with = "bucket_format")]
    #[diesel(sql_type = Timestamptz)]
    pub period: DateTime<Utc>,
    #[diesel(sql_type = Double)]
    pub average_grade: f64,
    #[diesel(sql_type = BigInt)]
    pub grade_count: i64,
}

#[derive(Serialize, Deserialize, QueryableByName, Debug, Clone, PartialEq)]
pub struct StudentAverage {
    #[diesel(sql_type = Text)]
    pub student_id: String,
    #[diesel(sql_type = Double)]
    pub average_grade: f64,
    #[diesel(sql_type = BigInt)]
    pub grade_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OnTimeStats {
    pub period: Period,
    pub on_time_count: i64,
    pub total_count: i64,
    pub percentage: f64,
}

impl OnTimeStats {
    /// Builds a row from raw counts. The percentage is 0 when there are no submissions.
    pub fn from_counts(period: Period, on_time_count: i64, total_count: i64) -> Self {
        let percentage = if total_count > 0 {
            on_time_count as f64 * 100.0 / total_count as f64
        } else {
            0.0
        };

        OnTimeStats {
            period,
            on_time_count,
            total_count,
            percentage,
        }
    }
}

/// Average of the per-student averages weighted by each student's row count.
pub fn weighted_group_average(students: &[StudentAverage]) -> f64 {
    let total_count: i64 = students.iter().map(|s| s.grade_count).sum();
    if total_count <= 0 {
        return 0.0;
    }

    let weighted_sum: f64 = students
        .iter()
        .map(|s| s.average_grade * s.grade_count as f64)
        .sum();
    weighted_sum / total_count as f64
}

// response bodies

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentCourseAverageResponse {
    pub student_id: String,
    pub course_id: String,
    pub average_grade: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentTaskAverageResponse {
    pub student_id: String,
    pub course_id: String,
    pub task_id: String,
    pub average_grade: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AveragesOverTimeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    pub averages: Vec<BucketAverage>,
    pub time_range: TimeRange,
    pub group_by: TimeBucket,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentTaskAveragesResponse {
    pub student_id: String,
    pub course_id: String,
    pub student_average: Option<f64>,
    pub other_students: Vec<StudentAverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TaskAveragesResponse {
    pub course_id: String,
    pub task_id: String,
    pub students: Vec<StudentAverage>,
    pub group_average: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OnTimePercentageResponse {
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub stats: Vec<OnTimeStats>,
    pub time_range: TimeRange,
    pub group_by: Option<TimeBucket>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use float_cmp::approx_eq;

    #[test]
    fn zero_total_gives_zero_percentage() {
        let stats = OnTimeStats::from_counts(Period::AllTime, 0, 0);
        assert_eq!(stats.percentage, 0.0);
        assert!(!stats.percentage.is_nan());
    }

    #[test]
    fn percentage_from_counts() {
        let stats = OnTimeStats::from_counts(Period::AllTime, 3, 4);
        assert!(approx_eq!(f64, stats.percentage, 75.0, ulps = 2));
    }

    #[test]
    fn period_serializes_as_tagged_text() {
        let bucket = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            serde_json::to_string(&Period::AllTime).unwrap(),
            "\"all_time\""
        );
        assert_eq!(
            serde_json::to_string(&Period::Bucket(bucket)).unwrap(),
            "\"2024-03-01T00:00:00Z\""
        );

        let parsed: Period = serde_json::from_str("\"2024-03-01T00:00:00Z\"").unwrap();
        assert_eq!(parsed, Period::Bucket(bucket));
        let parsed: Period = serde_json::from_str("\"all_time\"").unwrap();
        assert_eq!(parsed, Period::AllTime);
    }

    #[test]
    fn invalid_period_is_rejected() {
        assert!(serde_json::from_str::<Period>("\"yesterday\"").is_err());
    }

    #[test]
    fn group_average_is_weighted_by_count() {
        let students = vec![
            StudentAverage {
                student_id: "s1".to_string(),
                average_grade: 9.5,
                grade_count: 1,
            },
            StudentAverage {
                student_id: "s2".to_string(),
                average_grade: 8.0,
                grade_count: 1,
            },
        ];
        assert!(approx_eq!(f64, weighted_group_average(&students), 8.75, ulps = 2));

        let students = vec![
            StudentAverage {
                student_id: "s1".to_string(),
                average_grade: 85.0,
                grade_count: 2,
            },
            StudentAverage {
                student_id: "s2".to_string(),
                average_grade: 95.0,
                grade_count: 3,
            },
        ];
        assert!(approx_eq!(f64, weighted_group_average(&students), 91.0, ulps = 2));
        assert_eq!(weighted_group_average(&[]), 0.0);
    }

    #[test]
    fn bucket_names_round_trip_through_from_str() {
        for bucket in [
            TimeBucket::Day,
            TimeBucket::Week,
            TimeBucket::Month,
            TimeBucket::Quarter,
            TimeBucket::Year,
        ] {
            assert_eq!(bucket.as_str().parse::<TimeBucket>(), Ok(bucket));
        }
        assert!("hour".parse::<TimeBucket>().is_err());
    }
}
