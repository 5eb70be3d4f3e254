//! UUID helpers.
//!
//! All persisted ids are UUIDv7 so that lexicographic order matches
//! creation order; the retriever's deterministic tie-breaks rely on this.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v7_ids_sort_by_creation() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a.to_string() < b.to_string());
    }
}
