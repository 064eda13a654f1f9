//! Event identifier generation.

use uuid::Uuid;

/// Generates a new event id of the form `ev-<16 hex characters>` (19
/// characters total).
pub fn new_event_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("ev-{}", &raw[..16])
}

/// Returns true if `id` has the expected `ev-<16 hex>` shape.
pub fn is_well_formed(id: &str) -> bool {
    match id.strip_prefix("ev-") {
        Some(rest) => rest.len() == 16 && rest.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_well_formed() {
        for _ in 0..16 {
            let id = new_event_id();
            assert_eq!(id.len(), 19);
            assert!(is_well_formed(&id), "{id} is not well formed");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_well_formed("ev-short"));
        assert!(!is_well_formed("not-prefixed-0123456789abcdef"));
        assert!(!is_well_formed("ev-zzzzzzzzzzzzzzzz"));
    }
}
