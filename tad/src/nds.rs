//! The symbolic notation of templates, patterns and decoded packets.
//!
//! A packet is described as a tree of [`Node`]s. Every layer of a template or pattern is a
//! [`Node::Choice`] whose label names the layer (`"ip4"`, `"udp"`, ...) and whose value is a
//! [`Node::Struct`] keyed by field labels. Leaves are plain values (`Int`, `Bytes`, `Str`) or
//! wildcards (`Mask`, `Range`, `Enum`) that only make sense in patterns, and `Script`
//! expressions evaluated per generated packet.
//!
//! The tree (de)serializes with `serde`, so templates can be written as JSON:
//!
//! ```
//! # use tad::nds::{Node, Template};
//! let template: Template = serde_json::from_str(r#"{
//!     "pdus": [
//!         { "choice": ["udp", { "struct": { "dst-port": { "int": 2000 } } }] },
//!         { "choice": ["ip4", { "struct": { "time-to-live": { "int": 64 } } }] }
//!     ],
//!     "payload": { "bytes": [112, 105, 110, 103] }
//! }"#).unwrap();
//! assert_eq!(template.pdus.len(), 2);
//! ```
//!
//! [`Node`]: enum.Node.html
//! [`Node::Choice`]: enum.Node.html#variant.Choice
//! [`Node::Struct`]: enum.Node.html#variant.Struct
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::du::{DataUnit, DuKind};
use crate::{Error, Result};

/// One node of the symbolic tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Node {
    /// A plain integer.
    Int(i64),
    /// A text string, used as its UTF-8 bytes for octet fields.
    Str(String),
    /// Raw octets.
    Bytes(Vec<u8>),
    /// Matches when `received & mask == value & mask`.
    Mask {
        /// The expected bits.
        value: Vec<u8>,
        /// The bits that are compared.
        mask: Vec<u8>,
    },
    /// Matches integers within the inclusive range.
    Range {
        /// Smallest accepted value.
        first: i64,
        /// Largest accepted value.
        last: i64,
    },
    /// Matches any of the listed integers.
    Enum(Vec<i64>),
    /// An expression handed to the script evaluator.
    Script(String),
    /// Labelled children.
    Struct(BTreeMap<String, Node>),
    /// An ordered list.
    Seq(Vec<Node>),
    /// A labelled alternative, e.g. the layer of a PDU.
    Choice(String, Box<Node>),
}

/// The payload of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Payload {
    /// Explicit payload bytes.
    Bytes(Vec<u8>),
    /// A zero filled payload of the given length.
    Length(usize),
}

/// A template for generating packets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    /// One PDU per layer, top-most first. Missing trailing PDUs are empty.
    pub pdus: Vec<Node>,
    /// Payload handed to the top-most layer.
    pub payload: Option<Payload>,
    /// Argument sequences, one packet is generated per combination.
    ///
    /// The values are available to `Script` values as `$0`, `$1`, ...
    pub arg_sets: Vec<Vec<i64>>,
}

/// One alternative of a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternUnit {
    /// One PDU per layer, top-most first. Missing PDUs match anything.
    pub pdus: Vec<Node>,
}

/// A pattern for matching received packets.
///
/// A packet matches if any of the units matches, they are tried in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pattern {
    /// The alternatives.
    pub units: Vec<PatternUnit>,
}

impl Node {
    /// An empty structure.
    pub fn empty() -> Self {
        Node::Struct(BTreeMap::new())
    }

    /// Build a structure from labelled children.
    pub fn structure<L: Into<String>>(children: impl IntoIterator<Item=(L, Node)>) -> Self {
        Node::Struct(children.into_iter().map(|(l, n)| (l.into(), n)).collect())
    }

    /// Build a labelled alternative.
    pub fn choice(label: impl Into<String>, value: Node) -> Self {
        Node::Choice(label.into(), Box::new(value))
    }

    /// Get a child by label.
    ///
    /// For a structure this looks up the field, for a choice it returns the value if the label
    /// is the chosen one.
    pub fn get_child(&self, label: &str) -> Option<&Node> {
        match self {
            Node::Struct(children) => children.get(label),
            Node::Choice(chosen, value) if chosen == label => Some(value),
            _ => None,
        }
    }

    /// Read a child as a data unit of the given kind.
    ///
    /// A missing child is `Undef`.
    pub fn read_as(&self, label: &str, kind: DuKind) -> Result<DataUnit> {
        match self.get_child(label) {
            None => Ok(DataUnit::Undef),
            Some(child) => DataUnit::from_node(child, kind)
                .map_err(|err| match err {
                    Error::BadTemplate(msg) => Error::BadTemplate(format!("{}: {}", label, msg)),
                    other => other,
                }),
        }
    }

    /// Write a labelled child into a structure.
    pub fn write(&mut self, label: &str, value: Node) -> Result<()> {
        match self {
            Node::Struct(children) => {
                children.insert(label.to_owned(), value);
                Ok(())
            },
            Node::Choice(_, inner) => inner.write(label, value),
            _ => Err(Error::bad_template(format!("can not write `{}` into a leaf", label))),
        }
    }

    /// The label and value of a choice.
    pub fn as_choice(&self) -> Option<(&str, &Node)> {
        match self {
            Node::Choice(label, value) => Some((label, value)),
            _ => None,
        }
    }

    /// The elements of a sequence.
    pub fn as_seq(&self) -> Option<&[Node]> {
        match self {
            Node::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// The value of a plain integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Node::Int(val) => Some(*val),
            _ => None,
        }
    }

    /// The bytes of a plain octet or string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Node::Bytes(bytes) => Some(bytes),
            Node::Str(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Read an integer child, `None` if absent.
    pub fn int_child(&self, label: &str) -> Result<Option<i64>> {
        match self.get_child(label) {
            None => Ok(None),
            Some(Node::Int(val)) => Ok(Some(*val)),
            Some(_) => Err(Error::bad_template(format!("`{}` must be an integer", label))),
        }
    }

    /// Read an octet child, `None` if absent.
    pub fn bytes_child(&self, label: &str) -> Result<Option<&[u8]>> {
        match self.get_child(label) {
            None => Ok(None),
            Some(node) => node.as_bytes()
                .map(Some)
                .ok_or_else(|| Error::bad_template(format!("`{}` must be octets", label))),
        }
    }

    /// Read a sequence child, `None` if absent.
    pub fn seq_child(&self, label: &str) -> Result<Option<&[Node]>> {
        match self.get_child(label) {
            None => Ok(None),
            Some(node) => node.as_seq()
                .map(Some)
                .ok_or_else(|| Error::bad_template(format!("`{}` must be a sequence", label))),
        }
    }
}

impl Template {
    /// A template from its PDUs, without payload.
    pub fn new(pdus: Vec<Node>) -> Self {
        Template { pdus, payload: None, arg_sets: Vec::new() }
    }

    /// Replace the payload.
    pub fn with_payload(self, payload: Payload) -> Self {
        Template { payload: Some(payload), ..self }
    }

    /// The payload bytes handed to the top-most layer.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            None => Vec::new(),
            Some(Payload::Bytes(bytes)) => bytes.clone(),
            Some(Payload::Length(len)) => vec![0; *len],
        }
    }

    /// Every combination of the argument sets, in lexicographic order.
    ///
    /// Without argument sets this is a single empty combination.
    pub fn arg_combinations(&self) -> Vec<Vec<i64>> {
        let mut combos = vec![Vec::new()];
        for set in &self.arg_sets {
            let mut next = Vec::with_capacity(combos.len() * set.len());
            for prefix in &combos {
                for &val in set {
                    let mut combo = prefix.clone();
                    combo.push(val);
                    next.push(combo);
                }
            }
            combos = next;
        }
        combos
    }
}

impl Pattern {
    /// A pattern with a single unit.
    pub fn single(pdus: Vec<Node>) -> Self {
        Pattern { units: vec![PatternUnit { pdus }] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_access() {
        let mut node = Node::structure(vec![("ttl", Node::Int(64))]);
        assert_eq!(node.get_child("ttl"), Some(&Node::Int(64)));
        assert_eq!(node.read_as("ttl", DuKind::Int).unwrap(), DataUnit::Int(64));
        assert_eq!(node.read_as("tos", DuKind::Int).unwrap(), DataUnit::Undef);

        node.write("tos", Node::Int(3)).unwrap();
        assert_eq!(node.int_child("tos").unwrap(), Some(3));
        assert!(Node::Int(1).write("x", Node::Int(2)).is_err());
    }

    #[test]
    fn choice_access() {
        let pdu = Node::choice("udp", Node::empty());
        assert_eq!(pdu.as_choice().map(|(l, _)| l), Some("udp"));
        assert_eq!(pdu.get_child("udp"), Some(&Node::empty()));
        assert_eq!(pdu.get_child("tcp"), None);
    }

    #[test]
    fn bad_kind_names_field() {
        let node = Node::structure(vec![("src-addr", Node::Int(1))]);
        match node.read_as("src-addr", DuKind::Octets) {
            Err(Error::BadTemplate(msg)) => assert!(msg.starts_with("src-addr")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn json_template() {
        let template: Template = serde_json::from_str(r#"{
            "pdus": [{ "choice": ["udp", { "struct": { "src-port": { "int": 1000 } } }] }],
            "payload": { "length": 3 },
            "arg_sets": [[1, 2]]
        }"#).unwrap();
        assert_eq!(template.arg_sets, vec![vec![1, 2]]);
        assert_eq!(template.payload_bytes(), vec![0; 3]);
        let (label, udp) = template.pdus[0].as_choice().unwrap();
        assert_eq!(label, "udp");
        assert_eq!(udp.int_child("src-port").unwrap(), Some(1000));
    }

    #[test]
    fn combinations() {
        let mut template = Template::new(vec![]);
        assert_eq!(template.arg_combinations(), vec![Vec::<i64>::new()]);
        template.arg_sets = vec![vec![1, 2], vec![10, 20, 30]];
        let combos = template.arg_combinations();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![1, 10]);
        assert_eq!(combos[5], vec![2, 30]);
    }
}
