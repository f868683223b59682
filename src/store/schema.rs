// @generated manually, following Diesel's conventional layout.

diesel::table! {
    users (id) {
        id -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    jobs (id) {
        id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        script -> Text,
        working_dir -> Text,
        timeout_secs -> Integer,
        retry_count -> Integer,
        retry_delay_secs -> Integer,
        enabled -> Integer,
        notify_on -> Text,
        notify_recipients_json -> Text,
        timezone -> Text,
        created_by -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    schedules (job_id) {
        job_id -> Text,
        years_json -> Text,
        months_json -> Text,
        days_json -> Text,
        weekdays_json -> Text,
        hours_json -> Text,
        minutes_json -> Text,
    }
}

diesel::table! {
    runs (id) {
        id -> Text,
        job_id -> Text,
        status -> Text,
        exit_code -> Nullable<Integer>,
        trigger_type -> Text,
        started_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
        duration_ms -> Nullable<BigInt>,
        error -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    logs (id) {
        id -> Integer,
        run_id -> Text,
        ts -> Text,
        stream -> Text,
        content -> Text,
    }
}

diesel::table! {
    metrics (id) {
        id -> Integer,
        run_id -> Text,
        ts -> Text,
        cpu_pct -> Float,
        rss_bytes -> BigInt,
        mem_pct -> Float,
    }
}

diesel::table! {
    settings (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::joinable!(schedules -> jobs (job_id));
diesel::joinable!(runs -> jobs (job_id));
diesel::joinable!(logs -> runs (run_id));
diesel::joinable!(metrics -> runs (run_id));

diesel::allow_tables_to_appear_in_same_query!(users, jobs, schedules, runs, logs, metrics, settings,);
