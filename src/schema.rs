diesel::table! {
    grades (id) {
        id -> Int8,
        student_id -> Text,
        course_id -> Text,
        grade -> Numeric,
        on_time -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    grades_tasks (id) {
        id -> Int8,
        student_id -> Text,
        course_id -> Text,
        task_id -> Text,
        grade -> Numeric,
        on_time -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(grades, grades_tasks,);
