use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_moves_forward() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 1_600_000_000_000);
        assert!(b >= a);
    }
}
