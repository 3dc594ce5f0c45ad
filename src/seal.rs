//! The high-level sealing API: bind a secret to a visibility
//! expression, and recover it with whatever attribute keys a reader
//! holds.

use alloc::string::String;
use core::fmt;

use rand_core::{CryptoRng, RngCore};

use crate::cipher::{EncryptionError, LeafCipher};
use crate::expression::{parse, FormatError, NodeKind};
use crate::keys::{KeyLookupError, KeyStore, Keyring};
use crate::planner::{optimize, reconstruct, DecryptError, KeyOracle};
use crate::shares::{compute_shares_with_rng, SecretBytes, ShapeError, ShareNode, SharingError};
use crate::wrap::encode_wrapped;

/// Errors that can happen when sealing a secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncryptError {
    /// The visibility expression was malformed.
    Format(FormatError),
    /// The secret does not have the keyring's configured length.
    SecretLength {
        /// The length the keyring is configured for.
        expected: usize,
        /// The length of the secret supplied.
        actual: usize,
    },
    /// Shares could not be computed. See [`SharingError`].
    Sharing(SharingError),
    /// An attribute has no current key. Unlike decryption, writing
    /// cannot recover from a missing key.
    Key(KeyLookupError),
    /// The leaf cipher failed. See [`EncryptionError`].
    Encryption(EncryptionError),
}

impl fmt::Display for EncryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(error) => write!(f, "{}", error),
            Self::SecretLength { expected, actual } => {
                write!(f, "secret must be {} bytes, got {}", expected, actual)
            }
            Self::Sharing(error) => write!(f, "{}", error),
            Self::Key(error) => write!(f, "{}", error),
            Self::Encryption(error) => write!(f, "{}", error),
        }
    }
}

impl From<FormatError> for EncryptError {
    fn from(error: FormatError) -> Self {
        Self::Format(error)
    }
}

impl From<SharingError> for EncryptError {
    fn from(error: SharingError) -> Self {
        Self::Sharing(error)
    }
}

impl From<KeyLookupError> for EncryptError {
    fn from(error: KeyLookupError) -> Self {
        Self::Key(error)
    }
}

impl From<EncryptionError> for EncryptError {
    fn from(error: EncryptionError) -> Self {
        Self::Encryption(error)
    }
}

/// Seals `secret` under `expression`: splits it into shares along the
/// expression tree, wraps each leaf share under the current key of its
/// attribute, and returns the share expression carrying the result.
pub fn encrypt_with_rng<C: LeafCipher, S: KeyStore>(
    rng: &mut (impl CryptoRng + RngCore),
    keyring: &Keyring<C, S>,
    expression: &str,
    secret: &[u8],
) -> Result<String, EncryptError> {
    if secret.len() != keyring.secret_len() {
        return Err(EncryptError::SecretLength {
            expected: keyring.secret_len(),
            actual: secret.len(),
        });
    }
    let visibility = parse(expression)?;
    let mut tree = ShareNode::from_expression(&visibility, expression);
    compute_shares_with_rng(rng, &mut tree, secret)?;
    wrap_leaves(rng, &mut tree, keyring.cipher(), keyring.store())?;
    Ok(tree.encrypted_expression())
}

/// Seals `secret` under `expression` using the system RNG.
#[cfg(feature = "default-rng")]
pub fn encrypt<C: LeafCipher, S: KeyStore>(
    keyring: &Keyring<C, S>,
    expression: &str,
    secret: &[u8],
) -> Result<String, EncryptError> {
    encrypt_with_rng(&mut rand_core::OsRng, keyring, expression, secret)
}

fn wrap_leaves<C: LeafCipher, S: KeyStore>(
    rng: &mut (impl CryptoRng + RngCore),
    node: &mut ShareNode,
    cipher: &C,
    store: &S,
) -> Result<(), EncryptError> {
    if node.kind() == NodeKind::Term {
        let attribute = node
            .attribute
            .as_ref()
            .ok_or(EncryptError::Sharing(SharingError::Shape(
                ShapeError::IncompleteLeaf,
            )))?;
        let share = node
            .share
            .as_ref()
            .ok_or(EncryptError::Sharing(SharingError::Shape(
                ShapeError::IncompleteLeaf,
            )))?;
        let (key, version) = store.current_key(attribute)?;
        let ciphertext = cipher.encrypt(rng, share, &key)?;
        node.encrypted_share = Some(encode_wrapped(&ciphertext, version));
        return Ok(());
    }
    for child in &mut node.children {
        wrap_leaves(rng, child, cipher, store)?;
    }
    Ok(())
}

/// Recovers the secret sealed in `sealed` under `expression`.
///
/// Returns `Ok(None)` when the keys resolvable through the keyring's
/// store do not satisfy the expression; that is an expected outcome,
/// not an error.
pub fn decrypt<C: LeafCipher, S: KeyStore>(
    keyring: &Keyring<C, S>,
    expression: &str,
    sealed: &str,
) -> Result<Option<SecretBytes>, DecryptError> {
    let visibility = parse(expression)?;
    let mut tree = ShareNode::parse(sealed)?;
    tree.attach_attributes(&visibility, expression)?;

    let mut oracle = KeyOracle::new(keyring.store());
    let Some((mut pruned, _cost)) = optimize(&tree, &mut oracle)? else {
        return Ok(None);
    };
    reconstruct(&mut pruned, &oracle, keyring.cipher())?;
    let secret = pruned
        .take_share()
        .ok_or(DecryptError::Shape(ShapeError::IncompleteLeaf))?;
    Ok(Some(secret))
}

/// Computes the decryption plan without unwrapping anything: the
/// minimum-cost subtree the keyring's store can satisfy, or `None` when
/// the expression cannot be satisfied.
pub fn plan_decryption<C: LeafCipher, S: KeyStore>(
    keyring: &Keyring<C, S>,
    expression: &str,
    sealed: &str,
) -> Result<Option<ShareNode>, DecryptError> {
    let visibility = parse(expression)?;
    let mut tree = ShareNode::parse(sealed)?;
    tree.attach_attributes(&visibility, expression)?;

    let mut oracle = KeyOracle::new(keyring.store());
    Ok(optimize(&tree, &mut oracle)?.map(|(pruned, _cost)| pruned))
}
