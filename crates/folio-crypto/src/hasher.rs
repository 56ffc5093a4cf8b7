use folio_types::{DocumentId, GENERATED_ID_HEX_LEN};
use serde_json::Value;

/// Domain-separated BLAKE3 hasher for composed document ids.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so ids composed for different purposes can never collide
/// even when their inputs are byte-identical.
pub struct IdHasher {
    domain: &'static str,
}

impl IdHasher {
    /// Hasher for ids composed from a collection's unique keys.
    pub const UNIQUE_KEYS: Self = Self {
        domain: "folio-unique-keys-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Compose an id from unique-key values in declared order.
    ///
    /// Strings hash by their raw bytes; every other value hashes by its
    /// JSON text. Each encoded value is prefixed with its length (u64,
    /// little-endian) so no two key lists share a byte stream. The digest is
    /// truncated to [`GENERATED_ID_HEX_LEN`] hex chars.
    pub fn compose(&self, values: &[&Value]) -> DocumentId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for value in values {
            let rendered;
            let bytes = match value {
                Value::String(s) => s.as_bytes(),
                other => {
                    rendered = other.to_string();
                    rendered.as_bytes()
                }
            };
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let digest = hasher.finalize();
        let hex = hex::encode(&digest.as_bytes()[..GENERATED_ID_HEX_LEN / 2]);
        DocumentId::from_generated(hex)
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn compose_is_deterministic() {
        let a = json!("aaaa");
        let b = json!(9);
        let id1 = IdHasher::UNIQUE_KEYS.compose(&[&a, &b]);
        let id2 = IdHasher::UNIQUE_KEYS.compose(&[&a, &b]);
        assert_eq!(id1, id2);
        assert_eq!(id1.as_str().len(), GENERATED_ID_HEX_LEN);
    }

    #[test]
    fn order_matters() {
        let a = json!("x");
        let b = json!("y");
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&a, &b]),
            IdHasher::UNIQUE_KEYS.compose(&[&b, &a])
        );
    }

    #[test]
    fn value_boundaries_are_unambiguous() {
        let (ab, c) = (json!("ab"), json!("c"));
        let (a, bc) = (json!("a"), json!("bc"));
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&ab, &c]),
            IdHasher::UNIQUE_KEYS.compose(&[&a, &bc])
        );
    }

    #[test]
    fn control_characters_cannot_shift_the_boundary() {
        let (a_us, b) = (json!("a\u{1f}"), json!("b"));
        let (a, us_b) = (json!("a"), json!("\u{1f}b"));
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&a_us, &b]),
            IdHasher::UNIQUE_KEYS.compose(&[&a, &us_b])
        );
        let (empty, x) = (json!(""), json!("x"));
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&empty, &x]),
            IdHasher::UNIQUE_KEYS.compose(&[&x, &empty])
        );
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&x]),
            IdHasher::UNIQUE_KEYS.compose(&[&x, &empty])
        );
    }

    #[test]
    fn keys_hash_by_rendered_text() {
        // The string "9" and the number 9 render identically.
        assert_eq!(
            IdHasher::UNIQUE_KEYS.compose(&[&json!("9")]),
            IdHasher::UNIQUE_KEYS.compose(&[&json!(9)])
        );
        assert_ne!(
            IdHasher::UNIQUE_KEYS.compose(&[&json!("true")]),
            IdHasher::UNIQUE_KEYS.compose(&[&json!("false")])
        );
    }

    #[test]
    fn custom_domain_differs() {
        let v = json!("same");
        let custom = IdHasher::new("my-domain-v1");
        assert_eq!(custom.domain(), "my-domain-v1");
        assert_ne!(custom.compose(&[&v]), IdHasher::UNIQUE_KEYS.compose(&[&v]));
    }

    proptest! {
        #[test]
        fn compose_is_stable_for_any_keys(a in ".*", b in any::<i64>()) {
            let (a, b) = (json!(a), json!(b));
            let first = IdHasher::UNIQUE_KEYS.compose(&[&a, &b]);
            let second = IdHasher::UNIQUE_KEYS.compose(&[&a, &b]);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
