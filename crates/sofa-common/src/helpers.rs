pub fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_positive() {
        assert!(now_ms() > 0.0);
    }

    #[test]
    fn test_now_us_monotonic() {
        let t1 = now_us();
        let t2 = now_us();
        assert!(t2 >= t1, "Timestamps should be monotonically increasing");
    }
}
