//! The share tree: splitting a secret along a visibility expression.
//!
//! Shares compose through the tree so that the expression becomes the
//! access structure: an OR node hands its own share to every child, an
//! AND node splits its share into XOR summands, one per child. The root
//! share is the secret itself.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::expression::{parse, quote_term, term_name, FormatError, Node, NodeKind};

/// Byte strings holding shares or recovered secrets. Zeroized on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// An ill-formed or mismatched tree shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeError {
    /// An internal node has fewer than two children.
    TooFewChildren,
    /// The visibility tree and the share tree do not have the same shape.
    StructureMismatch,
    /// A leaf is missing its attribute, share or wrapped share.
    IncompleteLeaf,
    /// Sibling shares do not all have the same length.
    LengthMismatch,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewChildren => write!(f, "internal node has fewer than two children"),
            Self::StructureMismatch => {
                write!(f, "visibility and share trees differ in structure")
            }
            Self::IncompleteLeaf => write!(f, "leaf is missing attribute or share data"),
            Self::LengthMismatch => write!(f, "sibling shares differ in length"),
        }
    }
}

/// Errors produced while computing shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharingError {
    /// No secret bytes were supplied.
    EmptySecret,
    /// The tree cannot carry shares. See [`ShapeError`].
    Shape(ShapeError),
}

impl fmt::Display for SharingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySecret => write!(f, "a secret is required to compute shares"),
            Self::Shape(error) => write!(f, "{}", error),
        }
    }
}

impl From<ShapeError> for SharingError {
    fn from(error: ShapeError) -> Self {
        Self::Shape(error)
    }
}

/// A node of a share tree: the structure of a visibility expression with
/// share material attached.
///
/// Built either from a parsed visibility expression (for encryption) or
/// from a share expression (for decryption), in which case positions
/// refer to the share expression and attributes are filled in separately
/// by [`ShareNode::attach_attributes`].
#[derive(Clone)] // No Debug derivation, to avoid exposing shares accidentally.
pub struct ShareNode {
    pub(crate) kind: NodeKind,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) children: Vec<ShareNode>,
    pub(crate) share: Option<SecretBytes>,
    pub(crate) attribute: Option<String>,
    pub(crate) encrypted_share: Option<String>,
}

impl ShareNode {
    /// Copies the structure of a parsed visibility expression. Terms
    /// carry their resolved attribute names; no shares are assigned yet.
    pub fn from_expression(node: &Node, expression: &str) -> Self {
        let attribute = match node.kind {
            NodeKind::Term => Some(term_name(expression, node.start, node.end)),
            _ => None,
        };
        Self {
            kind: node.kind,
            start: node.start,
            end: node.end,
            children: node
                .children
                .iter()
                .map(|child| Self::from_expression(child, expression))
                .collect(),
            share: None,
            attribute,
            encrypted_share: None,
        }
    }

    /// Parses a share expression: the visibility grammar with each term
    /// carrying a (quoted) wrapped share instead of an attribute name.
    pub fn parse(share_expression: &str) -> Result<Self, FormatError> {
        let node = parse(share_expression)?;
        Ok(Self::from_share_syntax(&node, share_expression))
    }

    fn from_share_syntax(node: &Node, share_expression: &str) -> Self {
        let encrypted_share = match node.kind {
            NodeKind::Term => Some(term_name(share_expression, node.start, node.end)),
            _ => None,
        };
        Self {
            kind: node.kind,
            start: node.start,
            end: node.end,
            children: node
                .children
                .iter()
                .map(|child| Self::from_share_syntax(child, share_expression))
                .collect(),
            share: None,
            attribute: None,
            encrypted_share,
        }
    }

    /// The kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Child nodes, in source order.
    pub fn children(&self) -> &[ShareNode] {
        &self.children
    }

    /// The resolved attribute name of a term, if attached.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// The wrapped share of a term, if wrapped.
    pub fn encrypted_share(&self) -> Option<&str> {
        self.encrypted_share.as_deref()
    }

    /// The share assigned to this node, if any.
    pub fn share(&self) -> Option<&[u8]> {
        self.share.as_deref().map(Vec::as_slice)
    }

    /// Removes and returns this node's share.
    pub fn take_share(&mut self) -> Option<SecretBytes> {
        self.share.take()
    }

    /// Copies resolved attribute names from a parsed visibility
    /// expression onto this tree's terms, walking both trees in
    /// lockstep. The trees must have identical shape.
    pub fn attach_attributes(
        &mut self,
        visibility: &Node,
        expression: &str,
    ) -> Result<(), ShapeError> {
        if self.kind != visibility.kind || self.children.len() != visibility.children.len() {
            return Err(ShapeError::StructureMismatch);
        }
        if self.kind == NodeKind::Term {
            self.attribute = Some(term_name(expression, visibility.start, visibility.end));
        }
        for (child, visibility_child) in self.children.iter_mut().zip(&visibility.children) {
            child.attach_attributes(visibility_child, expression)?;
        }
        Ok(())
    }

    /// Renders the tree as a visibility expression over attribute names.
    /// Terms without an attached attribute render as empty.
    pub fn attribute_expression(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, &|node| match &node.attribute {
            Some(attribute) => quote_term(attribute),
            None => String::new(),
        });
        out
    }

    /// Renders the tree as a share expression with quoted wrapped shares,
    /// the form produced by encryption.
    pub fn encrypted_expression(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, &|node| match &node.encrypted_share {
            Some(encrypted) => quote_term(encrypted),
            None => String::new(),
        });
        out
    }

    /// Renders raw shares as hex. Diagnostic form, never parsed back.
    pub fn share_expression(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, &|node| match &node.share {
            Some(share) => hex::encode(&share[..]),
            None => String::new(),
        });
        out
    }

    fn render(&self, out: &mut String, leaf: &dyn Fn(&ShareNode) -> String) {
        match self.kind {
            NodeKind::Term => out.push_str(&leaf(self)),
            NodeKind::And | NodeKind::Or => {
                let separator = if self.kind == NodeKind::And { '&' } else { '|' };
                for (position, child) in self.children.iter().enumerate() {
                    if position > 0 {
                        out.push(separator);
                    }
                    let parenthesize = child.kind != NodeKind::Term && child.kind != self.kind;
                    if parenthesize {
                        out.push('(');
                    }
                    child.render(out, leaf);
                    if parenthesize {
                        out.push(')');
                    }
                }
            }
        }
    }
}

/// Assigns shares throughout the tree so that the root carries `secret`.
///
/// OR nodes copy their share to every child; an AND node with `k`
/// children draws `k - 1` fresh random strings and gives the last child
/// the XOR correction, so that the children XOR back to the parent.
pub fn compute_shares_with_rng(
    rng: &mut (impl CryptoRng + RngCore),
    tree: &mut ShareNode,
    secret: &[u8],
) -> Result<(), SharingError> {
    if secret.is_empty() {
        return Err(SharingError::EmptySecret);
    }
    assign_share(rng, tree, Zeroizing::new(secret.to_vec()))
}

/// Assigns shares using the system RNG.
#[cfg(feature = "default-rng")]
pub fn compute_shares(tree: &mut ShareNode, secret: &[u8]) -> Result<(), SharingError> {
    compute_shares_with_rng(&mut rand_core::OsRng, tree, secret)
}

fn assign_share(
    rng: &mut (impl CryptoRng + RngCore),
    node: &mut ShareNode,
    share: SecretBytes,
) -> Result<(), SharingError> {
    match node.kind {
        NodeKind::Term => {
            node.share = Some(share);
        }
        NodeKind::Or => {
            if node.children.len() < 2 {
                return Err(ShapeError::TooFewChildren.into());
            }
            for child in &mut node.children {
                assign_share(rng, child, share.clone())?;
            }
            node.share = Some(share);
        }
        NodeKind::And => {
            let count = node.children.len();
            if count < 2 {
                return Err(ShapeError::TooFewChildren.into());
            }
            // The last child receives secret ⊕ r₁ ⊕ … ⊕ r_{k-1}.
            let mut correction = share.clone();
            for position in 0..count - 1 {
                let mut random = Zeroizing::new(vec![0u8; share.len()]);
                rng.fill_bytes(&mut random);
                xor_into(&mut correction, &random);
                assign_share(rng, &mut node.children[position], random)?;
            }
            assign_share(rng, &mut node.children[count - 1], correction)?;
            node.share = Some(share);
        }
    }
    Ok(())
}

/// Checks the sharing invariants bottom-up: OR children equal their
/// parent's share, AND children XOR to it. Comparisons are constant-time.
pub fn verify_shares(node: &ShareNode) -> bool {
    let Some(share) = &node.share else {
        return false;
    };
    match node.kind {
        NodeKind::Term => true,
        NodeKind::Or => {
            node.children.len() >= 2
                && node.children.iter().all(|child| {
                    verify_shares(child)
                        && child
                            .share
                            .as_ref()
                            .map(|child_share| shares_equal(child_share, share))
                            .unwrap_or(false)
                })
        }
        NodeKind::And => {
            if node.children.len() < 2 {
                return false;
            }
            let mut combined = Zeroizing::new(vec![0u8; share.len()]);
            for child in &node.children {
                if !verify_shares(child) {
                    return false;
                }
                let Some(child_share) = &child.share else {
                    return false;
                };
                if child_share.len() != share.len() {
                    return false;
                }
                xor_into(&mut combined, child_share);
            }
            shares_equal(&combined, share)
        }
    }
}

pub(crate) fn xor_into(accumulator: &mut [u8], other: &[u8]) {
    for (a, b) in accumulator.iter_mut().zip(other) {
        *a ^= b;
    }
}

fn shares_equal(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use rand_core::OsRng;
    use zeroize::Zeroizing;

    use super::{compute_shares, verify_shares, ShapeError, ShareNode, SharingError};
    use crate::expression::parse;

    fn share_tree(expression: &str) -> ShareNode {
        ShareNode::from_expression(&parse(expression).unwrap(), expression)
    }

    fn leaf_shares(node: &ShareNode, out: &mut Vec<Vec<u8>>) {
        match node.share() {
            Some(share) if node.children().is_empty() => out.push(share.to_vec()),
            _ => {}
        }
        for child in node.children() {
            leaf_shares(child, out);
        }
    }

    #[test]
    fn shares_verify_for_well_formed_expressions() {
        let secret = b"0123456789abcdef";
        for expression in [
            "a",
            "a&b",
            "a&b&c",
            "a|b|c",
            "(a&b)|c",
            "(a|b)&c",
            "(a&b)|(b&c)",
            "((a&b)|c)&(d|e)",
            "a&(b|c|d)&(e|f)",
        ] {
            let mut tree = share_tree(expression);
            compute_shares(&mut tree, secret).unwrap();
            assert!(verify_shares(&tree), "failed for {}", expression);
            assert_eq!(tree.share().unwrap(), secret);
        }
    }

    #[test]
    fn root_mutation_breaks_verification() {
        let secret = b"0123456789abcdef";
        let mut tree = share_tree("(a&b)|c");
        compute_shares(&mut tree, secret).unwrap();
        let mut flipped = tree.share().unwrap().to_vec();
        flipped[0] ^= 0x01;
        tree.share = Some(Zeroizing::new(flipped));
        assert!(!verify_shares(&tree));
    }

    #[test]
    fn or_children_carry_the_parent_share() {
        let secret = b"0123456789abcdef";
        let mut tree = share_tree("a|b|c");
        compute_shares(&mut tree, secret).unwrap();
        for child in tree.children() {
            assert_eq!(child.share().unwrap(), secret);
        }
    }

    #[test]
    fn and_over_three_children_yields_three_distinct_summands() {
        let secret = b"0123456789abcdef";
        let mut tree = share_tree("a&b&c");
        compute_shares(&mut tree, secret).unwrap();
        let mut shares = Vec::new();
        leaf_shares(&tree, &mut shares);
        assert_eq!(shares.len(), 3);
        let mut combined = vec![0u8; secret.len()];
        for share in &shares {
            super::xor_into(&mut combined, share);
        }
        assert_eq!(combined, secret);
    }

    #[test]
    fn two_runs_produce_different_shares_that_both_verify() {
        let secret = b"0123456789abcdef";
        let mut first = share_tree("a&b");
        let mut second = share_tree("a&b");
        super::compute_shares_with_rng(&mut OsRng, &mut first, secret).unwrap();
        super::compute_shares_with_rng(&mut OsRng, &mut second, secret).unwrap();
        assert!(verify_shares(&first));
        assert!(verify_shares(&second));
        let mut first_shares = Vec::new();
        let mut second_shares = Vec::new();
        leaf_shares(&first, &mut first_shares);
        leaf_shares(&second, &mut second_shares);
        assert_ne!(first_shares, second_shares);
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut tree = share_tree("a&b");
        assert_eq!(
            compute_shares(&mut tree, b""),
            Err(SharingError::EmptySecret)
        );
    }

    #[test]
    fn undersized_internal_node_is_rejected() {
        let expression = "a&b";
        let mut tree = share_tree(expression);
        tree.children.truncate(1);
        assert_eq!(
            compute_shares(&mut tree, b"0123456789abcdef"),
            Err(SharingError::Shape(ShapeError::TooFewChildren))
        );
    }

    #[test]
    fn attach_attributes_copies_names() {
        let expression = "(\"test&|\"&b)|c";
        let visibility = parse(expression).unwrap();
        // Simulate a parsed share expression of the same shape.
        let mut tree = share_tree(expression);
        for child in &mut tree.children {
            child.attribute = None;
        }
        tree.attach_attributes(&visibility, expression).unwrap();
        assert_eq!(tree.attribute_expression(), expression);
        assert_eq!(tree.children()[0].children()[0].attribute(), Some("test&|"));
    }

    #[test]
    fn attach_attributes_rejects_shape_divergence() {
        let visibility = parse("a&b").unwrap();
        let mut tree = share_tree("a|b");
        assert_eq!(
            tree.attach_attributes(&visibility, "a&b"),
            Err(ShapeError::StructureMismatch)
        );
        let mut tree = share_tree("a&b&c");
        assert_eq!(
            tree.attach_attributes(&visibility, "a&b"),
            Err(ShapeError::StructureMismatch)
        );
    }

    #[test]
    fn verification_is_deterministic() {
        let secret = b"0123456789abcdef";
        let mut tree = share_tree("(a|b)&c");
        compute_shares(&mut tree, secret).unwrap();
        assert_eq!(verify_shares(&tree), verify_shares(&tree));
    }
}
