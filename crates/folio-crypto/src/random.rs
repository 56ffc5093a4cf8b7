use folio_types::{DocumentId, GENERATED_ID_HEX_LEN};
use rand::RngCore;

/// Draw a random document id.
///
/// Every random id in Folio comes from here, so length and alphabet stay
/// uniform with composed ids: [`GENERATED_ID_HEX_LEN`] lowercase hex chars
/// backed by 128 bits from the thread-local CSPRNG.
pub fn random_id() -> DocumentId {
    DocumentId::from_generated(random_hex())
}

/// Random lowercase hex string of [`GENERATED_ID_HEX_LEN`] chars.
pub fn random_hex() -> String {
    let mut bytes = [0u8; GENERATED_ID_HEX_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_ids_have_fixed_shape() {
        let id = random_id();
        assert_eq!(id.as_str().len(), GENERATED_ID_HEX_LEN);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn random_ids_do_not_repeat() {
        let ids: HashSet<_> = (0..10_000).map(|_| random_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn random_ids_are_valid_document_ids() {
        let id = random_id();
        assert_eq!(DocumentId::parse(id.as_str()).unwrap(), id);
    }
}
