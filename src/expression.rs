//! Parsing of visibility expressions.
//!
//! A visibility expression is a monotone boolean formula over attribute
//! names, built from `&`, `|` and parentheses. Operators may not be mixed
//! at a single nesting level (`a&b|c` must be written `(a&b)|c`). A name
//! is either a bareword over the attribute alphabet or a quoted string
//! in which `\\` and `\"` are the only valid escapes.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// The kind of a node in an expression tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A conjunction: every child must be satisfied.
    And,
    /// A disjunction: at least one child must be satisfied.
    Or,
    /// A leaf naming a single attribute.
    Term,
}

/// A node of a parsed visibility expression.
///
/// Positions are half-open byte ranges into the source expression.
/// Internal nodes always have at least two children, and same-kind
/// nesting is flattened during parsing, so `a&(b&c)` and `a&b&c`
/// produce identical trees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) children: Vec<Node>,
}

impl Node {
    /// The kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The half-open byte range this node spans in the source expression.
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Child nodes, in source order. Empty for terms.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// The resolved name of a term node: quotes stripped and escapes
    /// undone. Returns `None` for internal nodes.
    ///
    /// `expression` must be the string this node was parsed from.
    pub fn term_name(&self, expression: &str) -> Option<String> {
        match self.kind {
            NodeKind::Term => Some(term_name(expression, self.start, self.end)),
            _ => None,
        }
    }

    /// Renders the tree back into expression syntax, slicing term text
    /// from the source expression. Same-kind nesting was flattened during
    /// parsing, so the output is the canonical parenthesization.
    pub fn emit(&self, expression: &str) -> String {
        let mut out = String::with_capacity(expression.len());
        self.emit_into(expression, &mut out);
        out
    }

    fn emit_into(&self, expression: &str, out: &mut String) {
        match self.kind {
            NodeKind::Term => out.push_str(&expression[self.start..self.end]),
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
                    child.emit_into(expression, out);
                    if parenthesize {
                        out.push(')');
                    }
                }
            }
        }
    }
}

/// Errors produced when an expression does not conform to the grammar.
///
/// Carries the byte offset at which the problem was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatError {
    kind: FormatErrorKind,
    position: usize,
}

/// The specific grammar violation behind a [`FormatError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// `&` and `|` appeared at the same nesting level.
    MixedOperators,
    /// Two subterms follow each other without `&` or `|` between them.
    MissingOperator,
    /// The expression (or a parenthesized group) contains nothing.
    EmptyExpression,
    /// An operator has no term on one of its sides.
    EmptyTerm,
    /// An internal node ended up with fewer than two children.
    MissingTerm,
    /// A quoted term is missing its closing quote.
    UnterminatedQuote,
    /// A quoted term contains nothing.
    EmptyQuote,
    /// A backslash escapes something other than `\` or `"`.
    InvalidEscape,
    /// A character outside the attribute alphabet appeared unquoted.
    BadCharacter(char),
    /// Unbalanced parentheses.
    UnbalancedParens,
    /// A wrapped share carries no `ver` suffix or a non-decimal version.
    MissingVersion,
    /// A wrapped share payload is not valid base64.
    BadPayload,
}

impl FormatError {
    pub(crate) fn new(kind: FormatErrorKind, position: usize) -> Self {
        Self { kind, position }
    }

    /// The grammar violation.
    pub fn kind(&self) -> FormatErrorKind {
        self.kind
    }

    /// Byte offset into the source at which the violation was detected.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FormatErrorKind::MixedOperators => write!(f, "cannot mix & and |"),
            FormatErrorKind::MissingOperator => write!(f, "expression needs & or |"),
            FormatErrorKind::EmptyExpression => write!(f, "empty expression not allowed"),
            FormatErrorKind::EmptyTerm => write!(f, "empty term"),
            FormatErrorKind::MissingTerm => write!(f, "missing term"),
            FormatErrorKind::UnterminatedQuote => write!(f, "unterminated quote"),
            FormatErrorKind::EmptyQuote => write!(f, "empty quoted term"),
            FormatErrorKind::InvalidEscape => write!(f, "invalid escape sequence"),
            FormatErrorKind::BadCharacter(c) => write!(f, "bad character {:?}", c),
            FormatErrorKind::UnbalancedParens => write!(f, "parenthesis mis-match"),
            FormatErrorKind::MissingVersion => write!(f, "wrapped share has no version suffix"),
            FormatErrorKind::BadPayload => write!(f, "wrapped share payload is not base64"),
        }?;
        write!(f, " at offset {}", self.position)
    }
}

/// `true` for bytes permitted in an unquoted attribute name.
pub(crate) const fn is_term_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'/')
}

/// Parses a visibility expression into a tree.
pub fn parse(expression: &str) -> Result<Node, FormatError> {
    let (node, _consumed) = parse_level(expression, 0, 0)?;
    Ok(node)
}

/// Parses one nesting level starting at `from`, stopping at the matching
/// `)` (when `depth > 0`) or at end of input. Returns the node and the
/// index just past the consumed input.
fn parse_level(expression: &str, from: usize, depth: usize) -> Result<(Node, usize), FormatError> {
    let bytes = expression.as_bytes();

    // The collector for this level, created on the first operator.
    let mut result: Option<Node> = None;
    // A completed parenthesized subtree waiting to be attached.
    let mut pending: Option<Node> = None;
    let mut subterm_start = from;
    // Set after a closing quote or closing paren; any further term
    // content before an operator is an error.
    let mut term_complete = false;

    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            operator @ (b'&' | b'|') => {
                let kind = if operator == b'&' {
                    NodeKind::And
                } else {
                    NodeKind::Or
                };
                let child = process_term(subterm_start, i, pending.take())?;
                match &mut result {
                    None => {
                        result = Some(Node {
                            kind,
                            start: from,
                            end: from,
                            children: Vec::new(),
                        });
                    }
                    Some(node) if node.kind != kind => {
                        return Err(FormatError::new(FormatErrorKind::MixedOperators, i));
                    }
                    Some(_) => {}
                }
                // The unwrap cannot fail: `result` was just populated above.
                append_child(result.as_mut().unwrap(), child);
                subterm_start = i + 1;
                term_complete = false;
                i += 1;
            }
            b'(' => {
                if subterm_start != i || pending.is_some() {
                    return Err(FormatError::new(FormatErrorKind::MissingOperator, i));
                }
                let (node, after) = parse_level(expression, i + 1, depth + 1)?;
                pending = Some(node);
                i = after;
                subterm_start = i;
                term_complete = true;
            }
            b')' => {
                if depth == 0 {
                    return Err(FormatError::new(FormatErrorKind::UnbalancedParens, i));
                }
                let node = close_level(subterm_start, i, pending, result)?;
                return Ok((node, i + 1));
            }
            b'"' => {
                if subterm_start != i || pending.is_some() {
                    return Err(FormatError::new(FormatErrorKind::MissingOperator, i));
                }
                let mut j = i + 1;
                loop {
                    match bytes.get(j) {
                        None => {
                            return Err(FormatError::new(FormatErrorKind::UnterminatedQuote, i));
                        }
                        Some(b'"') => break,
                        Some(b'\\') => match bytes.get(j + 1) {
                            Some(b'\\') | Some(b'"') => j += 2,
                            _ => return Err(FormatError::new(FormatErrorKind::InvalidEscape, j)),
                        },
                        Some(_) => j += 1,
                    }
                }
                if j == i + 1 {
                    return Err(FormatError::new(FormatErrorKind::EmptyQuote, i));
                }
                term_complete = true;
                i = j + 1;
            }
            other => {
                if term_complete {
                    return Err(FormatError::new(FormatErrorKind::MissingOperator, i));
                }
                if !is_term_byte(other) {
                    // `other` sits on a character boundary: it is either ASCII
                    // or the lead byte of a multi-byte character.
                    let c = expression[i..].chars().next().unwrap_or('\u{fffd}');
                    return Err(FormatError::new(FormatErrorKind::BadCharacter(c), i));
                }
                i += 1;
            }
        }
    }

    if depth > 0 {
        return Err(FormatError::new(FormatErrorKind::UnbalancedParens, bytes.len()));
    }
    let node = close_level(subterm_start, bytes.len(), pending, result)?;
    Ok((node, bytes.len()))
}

/// Closes a nesting level at a `)` or at end of input: attaches the final
/// subterm and returns the completed node for this level.
fn close_level(
    subterm_start: usize,
    at: usize,
    pending: Option<Node>,
    result: Option<Node>,
) -> Result<Node, FormatError> {
    if subterm_start == at && pending.is_none() && result.is_none() {
        return Err(FormatError::new(FormatErrorKind::EmptyExpression, at));
    }
    let child = process_term(subterm_start, at, pending)?;
    match result {
        None => Ok(child),
        Some(mut node) => {
            append_child(&mut node, child);
            node.end = at;
            if node.children.len() < 2 {
                return Err(FormatError::new(FormatErrorKind::MissingTerm, at));
            }
            Ok(node)
        }
    }
}

/// Produces the child for the subterm spanning `[start, end)`. A non-empty
/// span becomes a term; an empty span yields the pending parenthesized
/// subtree, which must then be present.
fn process_term(start: usize, end: usize, pending: Option<Node>) -> Result<Node, FormatError> {
    if start != end {
        if pending.is_some() {
            return Err(FormatError::new(FormatErrorKind::MissingOperator, start));
        }
        return Ok(Node {
            kind: NodeKind::Term,
            start,
            end,
            children: Vec::new(),
        });
    }
    pending.ok_or_else(|| FormatError::new(FormatErrorKind::EmptyTerm, start))
}

/// Attaches `child` to `parent`, splicing same-kind internal children so
/// that the flattening invariant holds throughout parsing.
fn append_child(parent: &mut Node, child: Node) {
    if child.kind == parent.kind {
        parent.children.extend(child.children);
    } else {
        parent.children.push(child);
    }
}

/// Resolves the text of a term spanning `[start, end)`: quoted terms are
/// unquoted and unescaped, barewords are returned as-is.
pub(crate) fn term_name(expression: &str, start: usize, end: usize) -> String {
    let raw = &expression[start..end];
    if raw.len() >= 2 && raw.starts_with('"') {
        unescape(&raw[1..raw.len() - 1])
    } else {
        String::from(raw)
    }
}

fn unescape(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Renders an attribute name as expression syntax: bareword when every
/// byte is in the attribute alphabet, quoted (with escaping) otherwise.
pub(crate) fn quote_term(name: &str) -> String {
    if !name.is_empty() && name.bytes().all(is_term_byte) {
        return String::from(name);
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
