//! The leaf cipher: symmetric protection of terminal shares under
//! attribute keys. The core only ever sees the [`LeafCipher`] seam; the
//! default implementation wraps XChaCha20-Poly1305 behind an HKDF key
//! schedule.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use generic_array::typenum::Unsigned;
use generic_array::GenericArray;
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;

/// Errors that can happen when wrapping a leaf share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionError {
    /// Given plaintext is too large for the backend cipher.
    PlaintextTooLarge,
}

impl fmt::Display for EncryptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaintextTooLarge => write!(f, "plaintext is too large to encrypt"),
        }
    }
}

/// Errors that can happen when unwrapping a leaf share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecryptionError {
    /// The ciphertext is shorter than the cipher's overhead.
    CiphertextTooShort,
    /// The ciphertext's integrity check failed.
    AuthenticationFailed,
}

impl fmt::Display for DecryptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CiphertextTooShort => write!(f, "the ciphertext must include the nonce"),
            Self::AuthenticationFailed => {
                write!(f, "decryption of ciphertext failed: either someone tampered with the ciphertext or the key is incorrect")
            }
        }
    }
}

/// The symmetric cipher used to wrap terminal shares.
///
/// `encrypt` and `decrypt` must round-trip exactly: for any `key` and
/// plaintext, `decrypt(encrypt(rng, pt, key), key) == pt`. The key is
/// opaque byte material resolved by the key store; implementations
/// decide how to derive cipher keys from it.
pub trait LeafCipher {
    /// Encrypts `plaintext` under `key`.
    fn encrypt<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<Box<[u8]>, EncryptionError>;

    /// Decrypts `ciphertext` under `key`.
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, DecryptionError>;
}

fn kdf(key_material: &[u8]) -> Key {
    let hk = Hkdf::<Sha256>::new(None, key_material);
    let mut okm = Key::default();
    // We can only get an error here if the output size is too large,
    // and it's known at compile-time.
    hk.expand(&[], &mut okm).unwrap();
    okm
}

type NonceSize = <XChaCha20Poly1305 as AeadCore>::NonceSize;

/// The default leaf cipher: XChaCha20-Poly1305 with the cipher key
/// derived from the attribute key material via HKDF-SHA256. The random
/// nonce is carried as a prefix of the ciphertext.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XChaChaCipher;

impl LeafCipher for XChaChaCipher {
    fn encrypt<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<Box<[u8]>, EncryptionError> {
        let key_bytes = kdf(key);
        let cipher = XChaCha20Poly1305::new(&key_bytes);
        let mut nonce = GenericArray::<u8, NonceSize>::default();
        rng.fill_bytes(&mut nonce);
        let nonce = XNonce::from_slice(&nonce);
        let mut result = nonce.to_vec();
        let enc_data = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EncryptionError::PlaintextTooLarge)?;
        result.extend(enc_data);
        Ok(result.into_boxed_slice())
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let nonce_size = <NonceSize as Unsigned>::to_usize();
        if ciphertext.len() < nonce_size {
            return Err(DecryptionError::CiphertextTooShort);
        }
        let key_bytes = kdf(key);
        let cipher = XChaCha20Poly1305::new(&key_bytes);
        let nonce = XNonce::from_slice(&ciphertext[..nonce_size]);
        cipher
            .decrypt(nonce, &ciphertext[nonce_size..])
            .map_err(|_| DecryptionError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::{kdf, DecryptionError, LeafCipher, XChaChaCipher};

    #[test]
    fn kdf_is_deterministic_in_the_key_material() {
        let key = kdf(b"attribute key material");
        let key_same = kdf(b"attribute key material");
        assert_eq!(key, key_same);

        let key_diff = kdf(b"other material");
        assert_ne!(key, key_diff);
    }

    #[test]
    fn roundtrip() {
        let cipher = XChaChaCipher;
        let plaintext = b"0123456789abcdef";
        let ciphertext = cipher.encrypt(&mut OsRng, plaintext, b"some key").unwrap();
        let recovered = cipher.decrypt(&ciphertext, b"some key").unwrap();
        assert_eq!(recovered.as_slice(), plaintext);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let cipher = XChaChaCipher;
        let ciphertext = cipher
            .encrypt(&mut OsRng, b"0123456789abcdef", b"right key")
            .unwrap();
        assert_eq!(
            cipher.decrypt(&ciphertext, b"wrong key"),
            Err(DecryptionError::AuthenticationFailed)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let cipher = XChaChaCipher;
        let mut ciphertext = cipher
            .encrypt(&mut OsRng, b"0123456789abcdef", b"key")
            .unwrap()
            .into_vec();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert_eq!(
            cipher.decrypt(&ciphertext, b"key"),
            Err(DecryptionError::AuthenticationFailed)
        );
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let cipher = XChaChaCipher;
        assert_eq!(
            cipher.decrypt(b"short", b"key"),
            Err(DecryptionError::CiphertextTooShort)
        );
    }
}
