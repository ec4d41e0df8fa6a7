use super::{GradeRepository, StoreError, TaskGradeWrite};
use crate::model::grade::{NewCourseGrade, NewTaskGrade, TaskGradeRecord};
use crate::model::stats::{
    Average, BucketAverage, GradeScope, OnTimeScope, OnTimeStats, Period, StudentAverage,
    TimeBucket, TimeRange,
};
use crate::schema::{grades::dsl as grades_dsl, grades_tasks::dsl as tasks_dsl};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use deadpool_diesel::postgres::Pool;
use diesel::connection::SimpleConnection;
use diesel::dsl::{avg, exists, now};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text, Timestamptz};
use tracing::{debug, error, info, instrument, warn};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_grades.sql");

const RANGE_FILTER: &str = "($3::timestamptz IS NULL OR created_at >= $3) \
     AND ($4::timestamptz IS NULL OR created_at <= $4)";

#[derive(QueryableByName, Debug)]
struct OnTimeCountsRow {
    #[diesel(sql_type = BigInt)]
    on_time_count: i64,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName, Debug)]
struct OnTimeBucketRow {
    #[diesel(sql_type = Timestamptz)]
    period: DateTime<Utc>,
    #[diesel(sql_type = BigInt)]
    on_time_count: i64,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

/// `GradeRepository` backed by PostgreSQL through a deadpool-diesel pool.
#[derive(Clone)]
pub struct PgGradeStore {
    pool: Pool,
}

impl PgGradeStore {
    pub fn new(pool: Pool) -> Self {
        PgGradeStore { pool }
    }

    /// The underlying pool, for callers that read rows back directly (integration tests).
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Creates the grade tables and indexes when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        info!("Ensuring grade tables exist");
        self.run(|conn| conn.batch_execute(SCHEMA_SQL)).await
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|pool_err| {
            error!(
                "Failed to get DB connection object from pool: {:?}",
                pool_err
            );
            StoreError::Pool(pool_err)
        })?;
        debug!("DB connection object obtained from pool for interaction");

        match conn.interact(query).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(diesel_err)) => {
                error!("Diesel query failed within interaction: {:?}", diesel_err);
                Err(StoreError::Query(diesel_err))
            }
            Err(interact_err) => {
                error!("Deadpool interact error: {}", interact_err);
                Err(StoreError::Interact(interact_err.to_string()))
            }
        }
    }

    /// Runs `query` in a read-write transaction: commit on `Ok`, rollback on `Err`.
    async fn write<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |conn| conn.transaction(query)).await
    }

    /// Runs `query` in a read-only transaction.
    async fn read<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |conn| conn.build_transaction().read_only().run(query))
            .await
    }
}

fn update_task_rows(conn: &mut PgConnection, record: &TaskGradeRecord) -> QueryResult<usize> {
    let target = tasks_dsl::grades_tasks
        .filter(tasks_dsl::student_id.eq(record.student_id.clone()))
        .filter(tasks_dsl::course_id.eq(record.course_id.clone()))
        .filter(tasks_dsl::task_id.eq(record.task_id.clone()));

    match record.created_at {
        Some(created_at) => diesel::update(target)
            .set((
                tasks_dsl::grade.eq(record.grade.clone()),
                tasks_dsl::on_time.eq(record.on_time),
                tasks_dsl::created_at.eq(created_at),
            ))
            .execute(conn),
        None => diesel::update(target)
            .set((
                tasks_dsl::grade.eq(record.grade.clone()),
                tasks_dsl::on_time.eq(record.on_time),
                tasks_dsl::created_at.eq(now),
            ))
            .execute(conn),
    }
}

fn to_average(value: Option<BigDecimal>) -> Average {
    Average::from(value.and_then(|avg_grade| avg_grade.to_f64()))
}

#[async_trait]
impl GradeRepository for PgGradeStore {
    #[instrument(skip(self))]
    async fn insert_course_grade(&self, grade: NewCourseGrade) -> Result<(), StoreError> {
        let record = grade
            .to_record()
            .ok_or(StoreError::InvalidGrade(grade.grade))?;

        self.write(move |conn| {
            diesel::insert_into(grades_dsl::grades)
                .values(&record)
                .execute(conn)
        })
        .await?;

        info!(
            "Inserted course grade for student {} in course {}",
            grade.student_id, grade.course_id
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn insert_task_grade(&self, grade: NewTaskGrade) -> Result<(), StoreError> {
        let record = grade
            .to_record()
            .ok_or(StoreError::InvalidGrade(grade.grade))?;

        self.write(move |conn| {
            diesel::insert_into(tasks_dsl::grades_tasks)
                .values(&record)
                .execute(conn)
        })
        .await?;

        info!(
            "Inserted task grade for student {} in course {} task {}",
            grade.student_id, grade.course_id, grade.task_id
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_task_grade(&self, grade: NewTaskGrade) -> Result<usize, StoreError> {
        let record = grade
            .to_record()
            .ok_or(StoreError::InvalidGrade(grade.grade))?;

        let rows_affected = self
            .write(move |conn| update_task_rows(conn, &record))
            .await?;

        if rows_affected == 0 {
            warn!(
                "Task grade update matched no rows for student {} in course {} task {}",
                grade.student_id, grade.course_id, grade.task_id
            );
        } else {
            info!(
                "Updated {} task grade row(s) for student {} in course {} task {}",
                rows_affected, grade.student_id, grade.course_id, grade.task_id
            );
        }
        Ok(rows_affected)
    }

    #[instrument(skip(self))]
    async fn upsert_task_grade(&self, grade: NewTaskGrade) -> Result<TaskGradeWrite, StoreError> {
        let record = grade
            .to_record()
            .ok_or(StoreError::InvalidGrade(grade.grade))?;

        let outcome = self
            .write(move |conn| {
                // held until commit; concurrent writers of the same triple queue up here
                let lock_key = format!(
                    "{}:{}:{}",
                    record.student_id, record.course_id, record.task_id
                );
                diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind::<Text, _>(lock_key)
                    .execute(conn)?;

                let found = diesel::select(exists(
                    tasks_dsl::grades_tasks
                        .filter(tasks_dsl::student_id.eq(record.student_id.clone()))
                        .filter(tasks_dsl::course_id.eq(record.course_id.clone()))
                        .filter(tasks_dsl::task_id.eq(record.task_id.clone())),
                ))
                .get_result::<bool>(conn)?;

                if found {
                    update_task_rows(conn, &record).map(TaskGradeWrite::Updated)
                } else {
                    diesel::insert_into(tasks_dsl::grades_tasks)
                        .values(&record)
                        .execute(conn)
                        .map(|_| TaskGradeWrite::Inserted)
                }
            })
            .await?;

        info!(
            "Upserted task grade for student {} in course {} task {}: {:?}",
            grade.student_id, grade.course_id, grade.task_id, outcome
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn task_grade_exists(
        &self,
        student_id: &str,
        course_id: &str,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        let (student_id, course_id, task_id) =
            (student_id.to_owned(), course_id.to_owned(), task_id.to_owned());

        self.read(move |conn| {
            diesel::select(exists(
                tasks_dsl::grades_tasks
                    .filter(tasks_dsl::student_id.eq(student_id))
                    .filter(tasks_dsl::course_id.eq(course_id))
                    .filter(tasks_dsl::task_id.eq(task_id)),
            ))
            .get_result::<bool>(conn)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn average_for_student_in_course(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Average, StoreError> {
        let (student, course) = (student_id.to_owned(), course_id.to_owned());

        let avg_grade = self
            .read(move |conn| {
                grades_dsl::grades
                    .filter(grades_dsl::student_id.eq(student))
                    .filter(grades_dsl::course_id.eq(course))
                    .select(avg(grades_dsl::grade))
                    .get_result::<Option<BigDecimal>>(conn)
            })
            .await?;

        let average = to_average(avg_grade);
        if average == Average::NotFound {
            info!(
                "No grades found for student {} in course {}",
                student_id, course_id
            );
        }
        Ok(average)
    }

    #[instrument(skip(self))]
    async fn averages_over_time(
        &self,
        scope: GradeScope,
        range: TimeRange,
        bucket: TimeBucket,
    ) -> Result<Vec<BucketAverage>, StoreError> {
        let (column, id) = match scope {
            GradeScope::Student(id) => ("student_id", id),
            GradeScope::Course(id) => ("course_id", id),
        };

        let query = format!(
            "SELECT date_trunc($1, created_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS period, \
                    AVG(grade)::float8 AS average_grade, \
                    COUNT(*) AS grade_count \
             FROM grades \
             WHERE {column} = $2 AND {RANGE_FILTER} \
             GROUP BY period \
             ORDER BY period"
        );

        let averages = self
            .read(move |conn| {
                diesel::sql_query(query)
                    .bind::<Text, _>(bucket.as_str())
                    .bind::<Text, _>(id)
                    .bind::<Nullable<Timestamptz>, _>(range.start)
                    .bind::<Nullable<Timestamptz>, _>(range.end)
                    .load::<BucketAverage>(conn)
            })
            .await?;

        debug!("Fetched {} {} buckets", averages.len(), bucket);
        Ok(averages)
    }

    #[instrument(skip(self))]
    async fn average_task_grade_for_student(
        &self,
        student_id: &str,
        course_id: &str,
        task_id: &str,
    ) -> Result<Average, StoreError> {
        let (student, course, task) =
            (student_id.to_owned(), course_id.to_owned(), task_id.to_owned());

        let avg_grade = self
            .read(move |conn| {
                tasks_dsl::grades_tasks
                    .filter(tasks_dsl::student_id.eq(student))
                    .filter(tasks_dsl::course_id.eq(course))
                    .filter(tasks_dsl::task_id.eq(task))
                    .select(avg(tasks_dsl::grade))
                    .get_result::<Option<BigDecimal>>(conn)
            })
            .await?;

        Ok(to_average(avg_grade))
    }

    #[instrument(skip(self))]
    async fn student_course_task_average(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Average, StoreError> {
        let (student, course) = (student_id.to_owned(), course_id.to_owned());

        let avg_grade = self
            .read(move |conn| {
                tasks_dsl::grades_tasks
                    .filter(tasks_dsl::student_id.eq(student))
                    .filter(tasks_dsl::course_id.eq(course))
                    .select(avg(tasks_dsl::grade))
                    .get_result::<Option<BigDecimal>>(conn)
            })
            .await?;

        Ok(to_average(avg_grade))
    }

    #[instrument(skip(self))]
    async fn other_students_course_averages(
        &self,
        exclude_student_id: &str,
        course_id: &str,
    ) -> Result<Vec<StudentAverage>, StoreError> {
        let (excluded, course) = (exclude_student_id.to_owned(), course_id.to_owned());

        self.read(move |conn| {
            diesel::sql_query(
                "SELECT student_id, AVG(grade)::float8 AS average_grade, COUNT(*) AS grade_count \
                 FROM grades_tasks \
                 WHERE course_id = $1 AND student_id <> $2 \
                 GROUP BY student_id \
                 ORDER BY average_grade DESC, student_id ASC",
            )
            .bind::<Text, _>(course)
            .bind::<Text, _>(excluded)
            .load::<StudentAverage>(conn)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn averages_for_task(
        &self,
        course_id: &str,
        task_id: &str,
    ) -> Result<Vec<StudentAverage>, StoreError> {
        let (course, task) = (course_id.to_owned(), task_id.to_owned());

        self.read(move |conn| {
            diesel::sql_query(
                "SELECT student_id, AVG(grade)::float8 AS average_grade, COUNT(*) AS grade_count \
                 FROM grades_tasks \
                 WHERE course_id = $1 AND task_id = $2 \
                 GROUP BY student_id \
                 ORDER BY average_grade DESC, student_id ASC",
            )
            .bind::<Text, _>(course)
            .bind::<Text, _>(task)
            .load::<StudentAverage>(conn)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn on_time_percentage(
        &self,
        scope: OnTimeScope,
        range: TimeRange,
        bucket: Option<TimeBucket>,
    ) -> Result<Vec<OnTimeStats>, StoreError> {
        let (course_id, student_id) = match scope {
            OnTimeScope::Course { course_id } => (course_id, None),
            OnTimeScope::CourseStudent {
                course_id,
                student_id,
            } => (course_id, Some(student_id)),
        };

        let Some(bucket) = bucket else {
            let query = format!(
                "SELECT COUNT(*) FILTER (WHERE on_time) AS on_time_count, \
                        COUNT(*) AS total_count \
                 FROM grades_tasks \
                 WHERE course_id = $1 AND ($2::text IS NULL OR student_id = $2) \
                   AND {RANGE_FILTER}"
            );

            let counts = self
                .read(move |conn| {
                    diesel::sql_query(query)
                        .bind::<Text, _>(course_id)
                        .bind::<Nullable<Text>, _>(student_id)
                        .bind::<Nullable<Timestamptz>, _>(range.start)
                        .bind::<Nullable<Timestamptz>, _>(range.end)
                        .get_result::<OnTimeCountsRow>(conn)
                })
                .await?;

            return Ok(vec![OnTimeStats::from_counts(
                Period::AllTime,
                counts.on_time_count,
                counts.total_count,
            )]);
        };

        // bucket takes $1, so the range filter moves to $4/$5
        let query = "SELECT date_trunc($1, created_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS period, \
                    COUNT(*) FILTER (WHERE on_time) AS on_time_count, \
                    COUNT(*) AS total_count \
             FROM grades_tasks \
             WHERE course_id = $2 AND ($3::text IS NULL OR student_id = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5) \
             GROUP BY period \
             ORDER BY period";

        let rows = self
            .read(move |conn| {
                diesel::sql_query(query)
                    .bind::<Text, _>(bucket.as_str())
                    .bind::<Text, _>(course_id)
                    .bind::<Nullable<Text>, _>(student_id)
                    .bind::<Nullable<Timestamptz>, _>(range.start)
                    .bind::<Nullable<Timestamptz>, _>(range.end)
                    .load::<OnTimeBucketRow>(conn)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                OnTimeStats::from_counts(
                    Period::Bucket(row.period),
                    row.on_time_count,
                    row.total_count,
                )
            })
            .collect())
    }
}
