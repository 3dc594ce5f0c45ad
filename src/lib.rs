//! `caligo` binds a secret to a boolean expression over named
//! attributes. A reader can recover the secret if and only if they hold
//! attribute keys for some satisfying assignment of the expression.
//!
//! The secret is split into XOR shares along the expression tree: an OR
//! node hands its share to every child, an AND node splits its share
//! into one-time-pad summands. Each leaf share is then wrapped under
//! the current key of its attribute and the whole tree is serialized
//! into a share expression — the same grammar as the visibility
//! expression, with wrapped shares in place of attribute names. On the
//! way back, a planner picks the cheapest subtree the reader's keys can
//! satisfy and recombines only those shares.
//!
//! ## Available feature flags
//!
//! * `default-rng` - adds methods that use the system RNG (default).
//! * `std` - no effect in this crate itself, for downstream convenience.
//!
//! # Usage
//!
//! ```
//! use caligo::{decrypt, encrypt, Keyring, MemoryKeyStore, XChaChaCipher};
//!
//! // The key store maps attribute names to versioned key material.
//! // Possession of an attribute's key is what "having" that attribute
//! // means.
//! let mut store = MemoryKeyStore::new();
//! store.generate("finance");
//! store.generate("executive");
//! store.generate("audit");
//!
//! let keyring = Keyring::new(XChaChaCipher, store);
//!
//! // Seal a secret so that it takes either the audit key, or both the
//! // finance and executive keys, to recover it.
//! let secret = b"sixteen byte key";
//! let sealed = encrypt(&keyring, "(finance&executive)|audit", secret).unwrap();
//!
//! // A reader resolves keys through their own store; this one holds
//! // everything, so decryption succeeds.
//! let recovered = decrypt(&keyring, "(finance&executive)|audit", &sealed)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(&recovered[..], secret);
//!
//! // A reader without a satisfying key set gets `None`, not an error.
//! let empty = Keyring::new(XChaChaCipher, MemoryKeyStore::new());
//! assert!(decrypt(&empty, "(finance&executive)|audit", &sealed)
//!     .unwrap()
//!     .is_none());
//! ```

#![doc(html_root_url = "https://docs.rs/caligo")]
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]
#![no_std]
// Allows us to mark items in the documentation as gated under specific features.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod cipher;
mod expression;
mod keys;
mod planner;
mod seal;
mod shares;
mod wrap;

pub use cipher::{DecryptionError, EncryptionError, LeafCipher, XChaChaCipher};
pub use expression::{parse, FormatError, FormatErrorKind, Node, NodeKind};
pub use keys::{
    KeyLookupError, KeyMaterial, KeyStore, Keyring, MemoryKeyStore, DEFAULT_SECRET_LENGTH,
    GENERATED_KEY_LENGTH,
};
pub use planner::DecryptError;
pub use seal::{decrypt, encrypt_with_rng, plan_decryption, EncryptError};
pub use shares::{
    compute_shares_with_rng, verify_shares, SecretBytes, ShapeError, ShareNode, SharingError,
};

#[cfg(feature = "default-rng")]
pub use seal::encrypt;
#[cfg(feature = "default-rng")]
pub use shares::compute_shares;
