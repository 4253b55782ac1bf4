/// Clock helpers used for manifest and placement timestamps.
///
/// All persisted timestamps are Unix seconds so the manifest JSON stays
/// portable across platforms and languages.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
