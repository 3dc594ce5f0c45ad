//! Attribute key resolution: the PKI seam and the key container.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// The secret length used by [`Keyring::new`], in bytes.
pub const DEFAULT_SECRET_LENGTH: usize = 16;

/// The length of key material generated by [`MemoryKeyStore`], in bytes.
pub const GENERATED_KEY_LENGTH: usize = 32;

/// Key material resolved for an attribute. Zeroized on drop.
pub type KeyMaterial = Zeroizing<Vec<u8>>;

/// Errors signalled by a [`KeyStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyLookupError {
    /// No key material exists for the attribute.
    UnknownAttribute,
    /// The attribute exists, but not at the requested version.
    UnknownVersion,
}

impl fmt::Display for KeyLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAttribute => write!(f, "no key material for this attribute"),
            Self::UnknownVersion => write!(f, "no key at the requested version"),
        }
    }
}

/// Resolves attributes to versioned key material.
///
/// Writing always uses the latest key; reading may need a historical
/// version, carried in the wrapped share, so that material sealed
/// before a rotation stays recoverable.
pub trait KeyStore {
    /// The latest key for an attribute, for writing.
    fn current_key(&self, attribute: &str) -> Result<(KeyMaterial, u32), KeyLookupError>;

    /// A specific historical key for an attribute, for reading.
    fn key(&self, attribute: &str, version: u32) -> Result<KeyMaterial, KeyLookupError>;
}

/// An in-memory versioned key store.
///
/// Versions are decimal epochs starting at 1; generating a key for an
/// attribute that already has one appends the next version, which is
/// how rotation works.
#[derive(Clone, Default)] // No Debug derivation, to avoid exposing keys accidentally.
pub struct MemoryKeyStore {
    keys: BTreeMap<String, Vec<KeyMaterial>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fresh random key for `attribute` and returns its
    /// version. Creates the attribute at version 1 if absent; rotates
    /// it otherwise.
    pub fn generate_with_rng(
        &mut self,
        rng: &mut (impl CryptoRng + RngCore),
        attribute: &str,
    ) -> u32 {
        let mut material = Zeroizing::new(vec![0u8; GENERATED_KEY_LENGTH]);
        rng.fill_bytes(&mut material);
        self.insert_key(attribute, material)
    }

    /// Appends a fresh random key using the system RNG.
    #[cfg(feature = "default-rng")]
    pub fn generate(&mut self, attribute: &str) -> u32 {
        self.generate_with_rng(&mut rand_core::OsRng, attribute)
    }

    /// Appends explicit key material for `attribute` and returns its
    /// version.
    pub fn insert_key(&mut self, attribute: &str, material: KeyMaterial) -> u32 {
        let versions = self.keys.entry(attribute.to_string()).or_default();
        versions.push(material);
        versions.len() as u32
    }
}

impl KeyStore for MemoryKeyStore {
    fn current_key(&self, attribute: &str) -> Result<(KeyMaterial, u32), KeyLookupError> {
        let versions = self
            .keys
            .get(attribute)
            .ok_or(KeyLookupError::UnknownAttribute)?;
        // An attribute is only ever inserted together with a first key.
        let latest = versions.last().unwrap();
        Ok((latest.clone(), versions.len() as u32))
    }

    fn key(&self, attribute: &str, version: u32) -> Result<KeyMaterial, KeyLookupError> {
        let versions = self
            .keys
            .get(attribute)
            .ok_or(KeyLookupError::UnknownAttribute)?;
        if version == 0 || version as usize > versions.len() {
            return Err(KeyLookupError::UnknownVersion);
        }
        Ok(versions[version as usize - 1].clone())
    }
}

/// Binds together the pieces the sealing API needs: the leaf cipher,
/// the key store handle, and the secret length `L` every share carries.
pub struct Keyring<C, S> {
    cipher: C,
    store: S,
    secret_len: usize,
}

impl<C, S> Keyring<C, S> {
    /// Creates a keyring with the default secret length of 16 bytes.
    pub fn new(cipher: C, store: S) -> Self {
        Self::with_secret_len(cipher, store, DEFAULT_SECRET_LENGTH)
    }

    /// Creates a keyring for secrets of `secret_len` bytes.
    pub fn with_secret_len(cipher: C, store: S, secret_len: usize) -> Self {
        Self {
            cipher,
            store,
            secret_len,
        }
    }

    /// The leaf cipher.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    /// The key store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the key store, e.g. for rotation.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The secret length `L` in bytes.
    pub fn secret_len(&self) -> usize {
        self.secret_len
    }
}

#[cfg(test)]
mod tests {
    use zeroize::Zeroizing;

    use super::{KeyLookupError, KeyStore, MemoryKeyStore};

    #[test]
    fn unknown_attribute() {
        let store = MemoryKeyStore::new();
        assert_eq!(
            store.current_key("absent").unwrap_err(),
            KeyLookupError::UnknownAttribute
        );
        assert_eq!(
            store.key("absent", 1).unwrap_err(),
            KeyLookupError::UnknownAttribute
        );
    }

    #[test]
    fn versions_grow_with_rotation() {
        let mut store = MemoryKeyStore::new();
        assert_eq!(store.generate("attr"), 1);
        assert_eq!(store.generate("attr"), 2);

        let (latest, version) = store.current_key("attr").unwrap();
        assert_eq!(version, 2);
        assert_eq!(&latest[..], &store.key("attr", 2).unwrap()[..]);
        assert_ne!(&latest[..], &store.key("attr", 1).unwrap()[..]);
    }

    #[test]
    fn historical_versions_stay_resolvable() {
        let mut store = MemoryKeyStore::new();
        store.insert_key("attr", Zeroizing::new(b"first".to_vec()));
        store.insert_key("attr", Zeroizing::new(b"second".to_vec()));
        assert_eq!(&store.key("attr", 1).unwrap()[..], b"first");
        assert_eq!(&store.key("attr", 2).unwrap()[..], b"second");
    }

    #[test]
    fn out_of_range_versions_are_rejected() {
        let mut store = MemoryKeyStore::new();
        store.generate("attr");
        assert_eq!(
            store.key("attr", 0).unwrap_err(),
            KeyLookupError::UnknownVersion
        );
        assert_eq!(
            store.key("attr", 2).unwrap_err(),
            KeyLookupError::UnknownVersion
        );
    }
}
