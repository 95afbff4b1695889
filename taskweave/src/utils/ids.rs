//! Identifier generation.

use uuid::Uuid;

/// Generates a time-ordered run ID.
///
/// Run IDs must be stable across resumes, so callers that intend to resume
/// should generate one up front and reuse it.
#[must_use]
pub fn generate_run_id() -> String {
    format!("run_{}", Uuid::now_v7().simple())
}

/// Generates a random handle ID for futures.
#[must_use]
pub fn generate_handle_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_prefixed() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_id_is_v4() {
        assert_eq!(generate_handle_id().get_version_num(), 4);
    }
}
