//! ID generation utilities for Trellis
//!
//! Provides functions for generating unique identifiers for jobs and
//! subscriptions.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Generate a unique job ID
///
/// Format: `job-{timestamp_ms}-{random_hex}`
/// Example: `job-1738300800123-a1b2`
pub fn generate_job_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("job-{}-{:04x}", timestamp, random)
}

/// Generate a subscription ID
///
/// Format: `sub-{timestamp_ms}-{random_hex}`
pub fn generate_subscription_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("sub-{}-{:04x}", timestamp, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_positive() {
        assert!(now_ms() > 0);
    }

    #[test]
    fn test_generate_job_id_format() {
        let id = generate_job_id();
        assert!(id.starts_with("job-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn test_generate_subscription_id_format() {
        let id = generate_subscription_id();
        assert!(id.starts_with("sub-"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert_ne!(a, b);
    }
}
