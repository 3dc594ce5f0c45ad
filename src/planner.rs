//! The decryption planner: given the keys a reader can actually
//! resolve, decide whether the expression is satisfiable and pick the
//! minimum-cost subtree of shares to unwrap.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use zeroize::Zeroizing;

use crate::cipher::{DecryptionError, LeafCipher};
use crate::expression::{FormatError, NodeKind};
use crate::keys::{KeyLookupError, KeyMaterial, KeyStore};
use crate::shares::{xor_into, ShapeError, ShareNode};
use crate::wrap::{decode_wrapped, split_version};

/// Errors that can happen when planning or executing a decryption.
///
/// Note that holding insufficient keys is not an error: the planner
/// reports that as an unsatisfied plan, not a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecryptError {
    /// The expression or the sealed string was malformed.
    Format(FormatError),
    /// The share tree was unusable. See [`ShapeError`].
    Shape(ShapeError),
    /// An encrypted leaf failed to decrypt. See [`DecryptionError`].
    Integrity(DecryptionError),
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(error) => write!(f, "{}", error),
            Self::Shape(error) => write!(f, "{}", error),
            Self::Integrity(error) => write!(f, "{}", error),
        }
    }
}

impl From<FormatError> for DecryptError {
    fn from(error: FormatError) -> Self {
        Self::Format(error)
    }
}

impl From<ShapeError> for DecryptError {
    fn from(error: ShapeError) -> Self {
        Self::Shape(error)
    }
}

impl From<DecryptionError> for DecryptError {
    fn from(error: DecryptionError) -> Self {
        Self::Integrity(error)
    }
}

/// Memoizing front of a [`KeyStore`].
///
/// A lookup failure from the store means the attribute is simply not
/// available to this reader, so the error is absorbed rather than
/// propagated; both hits and misses are remembered.
pub(crate) struct KeyOracle<'a, S> {
    store: &'a S,
    resolved: BTreeMap<(String, u32), Option<KeyMaterial>>,
}

impl<'a, S: KeyStore> KeyOracle<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            resolved: BTreeMap::new(),
        }
    }

    /// Resolves `(attribute, version)`, remembering the outcome.
    pub(crate) fn lookup(&mut self, attribute: &str, version: u32) -> Option<&KeyMaterial> {
        let entry = (attribute.to_string(), version);
        if !self.resolved.contains_key(&entry) {
            let outcome = match self.store.key(attribute, version) {
                Ok(material) => Some(material),
                Err(KeyLookupError::UnknownAttribute | KeyLookupError::UnknownVersion) => None,
            };
            self.resolved.insert(entry.clone(), outcome);
        }
        self.resolved.get(&entry).and_then(Option::as_ref)
    }

    /// A key already resolved during planning, if it was found.
    fn resolved_key(&self, attribute: &str, version: u32) -> Option<&KeyMaterial> {
        self.resolved
            .get(&(attribute.to_string(), version))
            .and_then(Option::as_ref)
    }
}

/// Computes the minimum-cost satisfiable subtree.
///
/// Returns `None` when the resolvable keys do not satisfy the
/// expression. Cost counts leaf decryptions: a term costs 1; an AND
/// keeps every child and costs `max(children) + (k - 1)` for the
/// sibling shares that must be combined; an OR keeps exactly one child,
/// the cheapest, with ties broken in favour of the earliest.
pub(crate) fn optimize<S: KeyStore>(
    node: &ShareNode,
    oracle: &mut KeyOracle<'_, S>,
) -> Result<Option<(ShareNode, usize)>, DecryptError> {
    match node.kind {
        NodeKind::Term => {
            let wrapped = node
                .encrypted_share
                .as_ref()
                .ok_or(ShapeError::IncompleteLeaf)?;
            let attribute = node.attribute.as_ref().ok_or(ShapeError::IncompleteLeaf)?;
            let (_payload, version) = split_version(wrapped)?;
            match oracle.lookup(attribute, version) {
                Some(_) => Ok(Some((node.clone(), 1))),
                None => Ok(None),
            }
        }
        NodeKind::And => {
            let count = node.children.len();
            let mut kept = Vec::with_capacity(count);
            let mut deepest = 0;
            for child in &node.children {
                match optimize(child, oracle)? {
                    None => return Ok(None),
                    Some((pruned, cost)) => {
                        deepest = deepest.max(cost);
                        kept.push(pruned);
                    }
                }
            }
            Ok(Some((node.with_children(kept), deepest + count - 1)))
        }
        NodeKind::Or => {
            let mut best: Option<(ShareNode, usize)> = None;
            for child in &node.children {
                if let Some((pruned, cost)) = optimize(child, oracle)? {
                    // Strict comparison keeps the earliest child on ties.
                    if best.as_ref().map_or(true, |(_, best_cost)| cost < *best_cost) {
                        best = Some((pruned, cost));
                    }
                }
            }
            Ok(best.map(|(pruned, cost)| (node.with_children(vec![pruned]), cost)))
        }
    }
}

impl ShareNode {
    /// A copy of this node's metadata over a new child list.
    fn with_children(&self, children: Vec<ShareNode>) -> ShareNode {
        ShareNode {
            kind: self.kind,
            start: self.start,
            end: self.end,
            children,
            share: None,
            attribute: self.attribute.clone(),
            encrypted_share: self.encrypted_share.clone(),
        }
    }
}

/// Rebuilds shares bottom-up over a pruned tree: terms are unwrapped
/// with the keys resolved during planning, AND nodes XOR their
/// children, OR nodes copy their single kept child.
pub(crate) fn reconstruct<C: LeafCipher, S: KeyStore>(
    node: &mut ShareNode,
    oracle: &KeyOracle<'_, S>,
    cipher: &C,
) -> Result<(), DecryptError> {
    match node.kind {
        NodeKind::Term => {
            let wrapped = node
                .encrypted_share
                .as_ref()
                .ok_or(ShapeError::IncompleteLeaf)?;
            let attribute = node.attribute.as_ref().ok_or(ShapeError::IncompleteLeaf)?;
            let (ciphertext, version) = decode_wrapped(wrapped)?;
            let key = oracle
                .resolved_key(attribute, version)
                .ok_or(ShapeError::IncompleteLeaf)?;
            let share = cipher.decrypt(&ciphertext, key)?;
            node.share = Some(Zeroizing::new(share));
        }
        NodeKind::And => {
            let mut combined: Option<Zeroizing<Vec<u8>>> = None;
            for position in 0..node.children.len() {
                reconstruct(&mut node.children[position], oracle, cipher)?;
                let child_share = node.children[position]
                    .share
                    .as_ref()
                    .ok_or(ShapeError::IncompleteLeaf)?;
                match &mut combined {
                    None => combined = Some(child_share.clone()),
                    Some(accumulator) => {
                        if accumulator.len() != child_share.len() {
                            return Err(ShapeError::LengthMismatch.into());
                        }
                        xor_into(accumulator, child_share);
                    }
                }
            }
            node.share = combined;
        }
        NodeKind::Or => {
            // A planned OR keeps exactly one child.
            if node.children.len() != 1 {
                return Err(ShapeError::StructureMismatch.into());
            }
            reconstruct(&mut node.children[0], oracle, cipher)?;
            node.share = node.children[0].share.clone();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use rand_core::OsRng;

    use super::{optimize, reconstruct, KeyOracle};
    use crate::cipher::XChaChaCipher;
    use crate::expression::parse;
    use crate::keys::{KeyStore, MemoryKeyStore};
    use crate::seal::encrypt;
    use crate::shares::ShareNode;

    fn store_with(attributes: &[&str]) -> MemoryKeyStore {
        let mut store = MemoryKeyStore::new();
        for attribute in attributes {
            store.generate_with_rng(&mut OsRng, attribute);
        }
        store
    }

    /// Seals a throwaway secret under `expression` with keys for every
    /// attribute it names, then re-parses the sealed form attributed as
    /// a reader would see it.
    fn sealed_tree(expression: &str, writer: &MemoryKeyStore) -> ShareNode {
        let keyring = crate::Keyring::new(XChaChaCipher, writer.clone());
        let sealed = encrypt(&keyring, expression, b"0123456789abcdef").unwrap();
        let visibility = parse(expression).unwrap();
        let mut tree = ShareNode::parse(&sealed).unwrap();
        tree.attach_attributes(&visibility, expression).unwrap();
        tree
    }

    fn attributes_of(expression: &str) -> Vec<String> {
        fn walk(node: &crate::Node, expression: &str, out: &mut Vec<String>) {
            if let Some(name) = node.term_name(expression) {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
            for child in node.children() {
                walk(child, expression, out);
            }
        }
        let mut out = Vec::new();
        walk(&parse(expression).unwrap(), expression, &mut out);
        out
    }

    fn plan(expression: &str, available: &[&str]) -> Option<(String, usize)> {
        let all: Vec<String> = attributes_of(expression);
        let all_refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let writer = store_with(&all_refs);
        let tree = sealed_tree(expression, &writer);

        // The reader resolves only the available subset, but against the
        // writer's store so the key versions line up.
        let mut reader = MemoryKeyStore::new();
        for attribute in available {
            reader.insert_key(attribute, writer.key(attribute, 1).unwrap());
        }
        let mut oracle = KeyOracle::new(&reader);
        optimize(&tree, &mut oracle)
            .unwrap()
            .map(|(pruned, cost)| (pruned.attribute_expression(), cost))
    }

    #[test]
    fn minimal_subtrees() {
        let cases: &[(&str, &[&str], Option<&str>)] = &[
            ("a&b", &["a", "b"], Some("a&b")),
            ("a&b&c", &["a", "b"], None),
            ("a|b", &["a"], Some("a")),
            ("a|b|c", &["a", "b"], Some("a")),
            ("(a&b)|c", &["a", "b"], Some("(a&b)")),
            ("(a&b)|c", &["c"], Some("c")),
            ("(a|b)&c", &["a", "c"], Some("(a)&c")),
            ("(a|b)&c", &["a"], None),
            ("(a&b)|(b&c)", &["b", "c"], Some("(b&c)")),
            ("(a|b)&(c|d)", &["a", "d"], Some("(a)&(d)")),
            ("((a&b)|c)&(d|e)", &["c", "e"], Some("(c)&(e)")),
        ];
        for (expression, available, expected) in cases {
            let planned = plan(expression, available);
            assert_eq!(
                planned.as_ref().map(|(rendered, _)| rendered.as_str()),
                *expected,
                "{} with {:?}",
                expression,
                available
            );
        }
    }

    #[test]
    fn costs_count_leaf_decryptions() {
        assert_eq!(plan("a&b&c", &["a", "b", "c"]).unwrap().1, 3);
        assert_eq!(plan("a|b|c", &["a", "b", "c"]).unwrap().1, 1);
        assert_eq!(plan("((a&b)|c)&(d|e)", &["c", "e"]).unwrap().1, 2);
        assert_eq!(
            plan("((a&b)|c)&(d|e)", &["a", "b", "d"]).unwrap().1,
            3
        );
    }

    #[test]
    fn or_prefers_the_cheaper_branch() {
        let (rendered, cost) = plan("(a&b&c)|(d&e)", &["a", "b", "c", "d", "e"]).unwrap();
        assert_eq!(rendered, "(d&e)");
        assert_eq!(cost, 2);
    }

    #[test]
    fn planning_is_deterministic() {
        let first = plan("(a&b)|(b&c)", &["a", "b", "c"]);
        let second = plan("(a&b)|(b&c)", &["a", "b", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn reconstruction_recovers_the_root_share() {
        let expression = "(a|b)&c";
        let writer = store_with(&["a", "b", "c"]);
        let keyring = crate::Keyring::new(XChaChaCipher, writer.clone());
        let secret = b"0123456789abcdef";
        let sealed = encrypt(&keyring, expression, secret).unwrap();

        let visibility = parse(expression).unwrap();
        let mut tree = ShareNode::parse(&sealed).unwrap();
        tree.attach_attributes(&visibility, expression).unwrap();

        let mut oracle = KeyOracle::new(&writer);
        let (mut pruned, _cost) = optimize(&tree, &mut oracle).unwrap().unwrap();
        reconstruct(&mut pruned, &oracle, &XChaChaCipher).unwrap();
        assert_eq!(pruned.share().unwrap(), secret);
    }
}
