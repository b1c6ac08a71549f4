use aliri_braid::braid;
use std::fmt;

macro_rules! concealed {
    ($ty:ty: $hidden:literal, $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $reveal)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }
    };
}

fn reveal_prefix(unprotected: &str, f: &mut fmt::Formatter, max_len: usize) -> fmt::Result {
    if unprotected.len() <= max_len {
        return f.write_str(unprotected);
    }

    match unprotected.char_indices().nth(max_len) {
        Some((idx, _)) => {
            f.write_str(&unprotected[..idx])?;
            f.write_str("…")
        }
        None => f.write_str(unprotected),
    }
}

/// A subscription key, the identity secret presented to the issuance endpoint
#[braid(serde, debug = "owned", display = "owned")]
pub struct SubscriptionKey;

concealed!(SubscriptionKeyRef: "SUBSCRIPTION KEY", 4);

/// A bearer token as handed to callers, always carrying the `Bearer ` prefix
#[braid(serde, debug = "owned", display = "owned")]
pub struct BearerToken;

concealed!(BearerTokenRef: "BEARER TOKEN", 15);

/// A region selecting a region-scoped issuance endpoint; empty means global
#[braid(serde)]
pub struct Region;
