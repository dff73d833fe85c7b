pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_timestamp_is_recent() {
        // 2021-01-01; anything earlier means the clock read failed.
        assert!(current_timestamp() > 1_609_459_200);
    }
}
