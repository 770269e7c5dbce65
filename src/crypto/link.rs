use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

/// The number of random bytes behind a link id.
const LINK_ID_BYTES: usize = 32;

/// Issues a new public link id.
///
/// Possession of the link is the only check on the view path, so the id is
/// drawn from the OS RNG and never derived from user input. 32 bytes encode
/// to 43 URL-safe characters.
pub fn generate_link_id() -> String {
    let mut token = [0u8; LINK_ID_BYTES];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Cheap shape check so obviously malformed ids never reach the store.
pub fn is_well_formed(link_id: &str) -> bool {
    !link_id.is_empty()
        && link_id.len() <= 128
        && link_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn link_ids_are_url_safe_and_unique() {
        let ids: HashSet<String> = (0..1_000).map(|_| generate_link_id()).collect();
        assert_eq!(ids.len(), 1_000);

        for id in &ids {
            assert_eq!(id.len(), 43);
            assert!(is_well_formed(id), "{id} should be URL safe");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("../etc/passwd"));
        assert!(!is_well_formed(&"a".repeat(129)));
        assert!(is_well_formed("0f8fad5b-d9cb-469f-a165-70867728950e"));
    }
}
