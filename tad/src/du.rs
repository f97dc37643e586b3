//! Data units, the tagged values carried by header fields.
//!
//! A data unit is built from a template or pattern node, consumed while encoding or matching a
//! header and dropped with the layer's PDU. Once typed the variant does not change, converting
//! means producing a new unit.
use byteorder::{ByteOrder, NetworkEndian};

use crate::bps::bits;
use crate::nds::Node;
use crate::{Error, Result};

/// The value kind a field expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuKind {
    /// An integer of at most 32 bits.
    Int,
    /// An octet string.
    Octets,
}

/// A tagged field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataUnit {
    /// No value, matches anything.
    Undef,
    /// An integer, the bit pattern of a field of up to 32 bits.
    Int(u32),
    /// An octet string.
    Octets(Vec<u8>),
    /// Matches when `received & mask == value & mask`.
    Mask {
        /// The expected bits.
        value: Vec<u8>,
        /// The compared bits.
        mask: Vec<u8>,
    },
    /// Matches integers in the inclusive range.
    Range(i64, i64),
    /// Matches any of the integers.
    Enum(Vec<i64>),
    /// An expression for the script evaluator.
    Script(String),
}

/// A field value extracted from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'a> {
    /// An integer field.
    Int(u32),
    /// An octet string field.
    Octets(&'a [u8]),
}

/// Evaluates `Script` data units.
pub trait Evaluator: Send + Sync {
    /// Evaluate an expression with the arguments of the current packet.
    fn evaluate(&self, expr: &str, args: &[i64]) -> Result<i64>;
}

/// An evaluator for argument references.
///
/// Understands integer literals, `$N` for the `N`-th argument and `$N + k` or `$N - k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgsEvaluator;

/// The context in which data units are resolved.
#[derive(Clone, Copy, Default)]
pub struct EvalCx<'a> {
    /// The installed evaluator, if any.
    pub evaluator: Option<&'a dyn Evaluator>,
    /// Arguments of the packet being generated.
    pub args: &'a [i64],
}

impl Default for DataUnit {
    fn default() -> Self {
        DataUnit::Undef
    }
}

impl DataUnit {
    /// Build a data unit of the expected kind from a node.
    pub fn from_node(node: &Node, kind: DuKind) -> Result<Self> {
        let du = match (node, kind) {
            (Node::Int(val), DuKind::Int) => DataUnit::Int(int_from_i64(*val)?),
            (Node::Int(_), DuKind::Octets) => {
                return Err(Error::bad_template("integer given for octet field"));
            },
            (Node::Bytes(bytes), DuKind::Octets) => DataUnit::Octets(bytes.clone()),
            (Node::Str(text), DuKind::Octets) => DataUnit::Octets(text.as_bytes().to_vec()),
            (Node::Bytes(bytes), DuKind::Int) => {
                let val = bits::be_int(bytes)
                    .filter(|_| bytes.len() <= 4)
                    .ok_or_else(|| Error::bad_template("octets too long for integer field"))?;
                DataUnit::Int(val as u32)
            },
            (Node::Mask { value, mask }, _) => DataUnit::Mask {
                value: value.clone(),
                mask: mask.clone(),
            },
            (Node::Range { first, last }, DuKind::Int) if first <= last => {
                DataUnit::Range(*first, *last)
            },
            (Node::Range { .. }, _) => {
                return Err(Error::bad_template("range must be over integers with first <= last"));
            },
            (Node::Enum(set), _) => DataUnit::Enum(set.clone()),
            (Node::Script(expr), _) => DataUnit::Script(expr.clone()),
            (other, _) => {
                return Err(Error::bad_template(format!("unexpected value {:?}", other)));
            },
        };
        Ok(du)
    }

    /// Convert back into a node, `None` for `Undef`.
    pub fn to_node(&self) -> Option<Node> {
        Some(match self {
            DataUnit::Undef => return None,
            DataUnit::Int(val) => Node::Int(i64::from(*val)),
            DataUnit::Octets(bytes) => Node::Bytes(bytes.clone()),
            DataUnit::Mask { value, mask } => Node::Mask { value: value.clone(), mask: mask.clone() },
            DataUnit::Range(first, last) => Node::Range { first: *first, last: *last },
            DataUnit::Enum(set) => Node::Enum(set.clone()),
            DataUnit::Script(expr) => Node::Script(expr.clone()),
        })
    }

    /// Query whether this is the wildcard `Undef`.
    pub fn is_undef(&self) -> bool {
        matches!(self, DataUnit::Undef)
    }

    /// Query whether a packet can be generated from this value.
    pub fn is_sendable(&self) -> bool {
        matches!(self, DataUnit::Int(_) | DataUnit::Octets(_) | DataUnit::Script(_))
    }

    /// The integer value, if this is an integer.
    pub fn as_int(&self) -> Option<u32> {
        match self {
            DataUnit::Int(val) => Some(*val),
            _ => None,
        }
    }

    /// The octets, if this is an octet string.
    pub fn as_octets(&self) -> Option<&[u8]> {
        match self {
            DataUnit::Octets(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Replace a `Script` by the integer it evaluates to.
    pub fn resolve(&self, cx: &EvalCx) -> Result<DataUnit> {
        match self {
            DataUnit::Script(expr) => {
                let evaluator = cx.evaluator
                    .ok_or(Error::Unsupported("script value without an evaluator"))?;
                let val = evaluator.evaluate(expr, cx.args)?;
                Ok(DataUnit::Int(int_from_i64(val)?))
            },
            other => Ok(other.clone()),
        }
    }

    /// Test a received value against this unit.
    pub fn matches(&self, value: Value, cx: &EvalCx) -> Result<bool> {
        let matched = match (self, value) {
            (DataUnit::Undef, _) => true,
            (DataUnit::Int(expected), Value::Int(received)) => *expected == received,
            (DataUnit::Int(expected), Value::Octets(received)) => {
                received.len() <= 4 && bits::be_int(received) == Some(u64::from(*expected))
            },
            (DataUnit::Octets(expected), Value::Octets(received)) => {
                received.len() >= expected.len() && received[..expected.len()] == expected[..]
            },
            (DataUnit::Octets(expected), Value::Int(received)) => {
                expected.len() <= 4 && bits::be_int(expected) == Some(u64::from(received))
            },
            (DataUnit::Mask { value, mask }, Value::Int(received)) => {
                let mask = bits::be_int(mask).unwrap_or(u64::MAX);
                let value = bits::be_int(value).unwrap_or(0);
                (u64::from(received) & mask) == (value & mask)
            },
            (DataUnit::Mask { value, mask }, Value::Octets(received)) => {
                mask.len() <= received.len() && mask.iter()
                    .zip(received)
                    .enumerate()
                    .all(|(i, (m, r))| r & m == value.get(i).copied().unwrap_or(0) & m)
            },
            (DataUnit::Range(first, last), Value::Int(received)) => {
                (*first..=*last).contains(&i64::from(received))
            },
            (DataUnit::Range(..), Value::Octets(_)) => {
                return Err(Error::Unsupported("range over an octet string"));
            },
            (DataUnit::Enum(set), Value::Int(received)) => set.contains(&i64::from(received)),
            (DataUnit::Enum(set), Value::Octets(received)) => {
                match bits::be_int(received) {
                    Some(val) => set.iter().any(|&item| item as u64 == val),
                    None => false,
                }
            },
            (DataUnit::Script(_), _) => return self.resolve(cx)?.matches(value, cx),
        };
        Ok(matched)
    }

    /// Extract a field of a buffer and test it against this unit.
    pub fn matches_bytes(&self, bytes: &[u8], bit_offset: usize, bit_len: usize, cx: &EvalCx)
        -> Result<bool>
    {
        let value = extract(bytes, bit_offset, bit_len, DuKind::Int)
            .ok_or(Error::Truncated)?;
        self.matches(value, cx)
    }

    /// Serialize into `out` at a bit offset.
    ///
    /// A `bit_len` of zero denotes a variable width field that takes the length of the octet
    /// string. Returns the number of bits written.
    pub fn to_bytes(&self, cx: &EvalCx, out: &mut [u8], bit_offset: usize, bit_len: usize)
        -> Result<usize>
    {
        match self.resolve(cx)? {
            DataUnit::Int(val) => {
                if bit_len == 0 || bit_len > 32 {
                    return Err(Error::bad_template("integer given for a wide octet field"));
                }
                if bit_len < 32 && val >> bit_len != 0 {
                    return Err(Error::bad_template(format!(
                        "value {} does not fit {} bits", val, bit_len)));
                }
                if bit_offset + bit_len > out.len() * 8 {
                    return Err(Error::Fatal("encode buffer too short"));
                }

                if bit_offset % 8 == 0 {
                    let at = &mut out[bit_offset / 8..];
                    match bit_len {
                        8 => { at[0] = val as u8; return Ok(8) },
                        16 => { NetworkEndian::write_u16(at, val as u16); return Ok(16) },
                        32 => { NetworkEndian::write_u32(at, val); return Ok(32) },
                        _ => (),
                    }
                }

                bits::write(out, bit_offset, bit_len, u64::from(val));
                Ok(bit_len)
            },
            DataUnit::Octets(bytes) => {
                if bit_offset % 8 != 0 || bit_len % 8 != 0 {
                    return Err(Error::Unsupported("octet string at a non-aligned offset"));
                }
                let width = if bit_len == 0 { bytes.len() } else { bit_len / 8 };
                if bytes.len() > width {
                    return Err(Error::bad_template(format!(
                        "{} octets given for a {} octet field", bytes.len(), width)));
                }
                let start = bit_offset / 8;
                let target = out.get_mut(start..start + width)
                    .ok_or(Error::Fatal("encode buffer too short"))?;
                target[..bytes.len()].copy_from_slice(&bytes);
                for byte in &mut target[bytes.len()..] {
                    *byte = 0;
                }
                Ok(width * 8)
            },
            DataUnit::Undef => Err(Error::bad_template("no value to encode")),
            _ => Err(Error::bad_template("wildcard value in a template")),
        }
    }

    /// The bit length of a value with its own length, zero otherwise.
    pub fn bit_length(&self) -> usize {
        match self {
            DataUnit::Octets(bytes) => bytes.len() * 8,
            DataUnit::Mask { value, .. } => value.len() * 8,
            _ => 0,
        }
    }

    /// Reset to `Undef`.
    pub fn clear(&mut self) {
        *self = DataUnit::Undef;
    }

    /// Resize a dynamic length octet string, zero filling new octets.
    pub fn realloc(&mut self, new_len: usize) -> Result<()> {
        match self {
            DataUnit::Octets(bytes) => {
                bytes.resize(new_len, 0);
                Ok(())
            },
            DataUnit::Undef => {
                *self = DataUnit::Octets(vec![0; new_len]);
                Ok(())
            },
            _ => Err(Error::invalid("only octet strings can be resized")),
        }
    }
}

/// Extract a field from a buffer.
///
/// Fields of at most 32 bits expected as integers, and all non-aligned fields, are integers.
/// Returns `None` if the buffer is too short.
pub fn extract(bytes: &[u8], bit_offset: usize, bit_len: usize, kind: DuKind) -> Option<Value> {
    let aligned = bit_offset % 8 == 0 && bit_len % 8 == 0;
    if bit_len <= 32 && (kind == DuKind::Int || !aligned) {
        return bits::read(bytes, bit_offset, bit_len).map(|val| Value::Int(val as u32));
    }
    if !aligned {
        return None;
    }
    bytes.get(bit_offset / 8..(bit_offset + bit_len) / 8).map(Value::Octets)
}

impl Value<'_> {
    /// Convert into an owned data unit.
    pub fn to_du(self) -> DataUnit {
        match self {
            Value::Int(val) => DataUnit::Int(val),
            Value::Octets(bytes) => DataUnit::Octets(bytes.to_vec()),
        }
    }
}

/// Convert to the bit pattern of a field of up to 32 bits.
///
/// Negative values are accepted down to `i32::MIN` and stored in two's complement.
pub fn int_from_i64(val: i64) -> Result<u32> {
    if (0..=i64::from(u32::MAX)).contains(&val) {
        Ok(val as u32)
    } else if val >= i64::from(i32::MIN) {
        Ok(val as i32 as u32)
    } else {
        Err(Error::bad_template(format!("integer {} out of range", val)))
    }
}

impl Evaluator for ArgsEvaluator {
    fn evaluate(&self, expr: &str, args: &[i64]) -> Result<i64> {
        let bad = || Error::bad_template(format!("can not evaluate `{}`", expr));
        let expr = expr.trim();

        let rest = match expr.strip_prefix('$') {
            None => return expr.parse().map_err(|_| bad()),
            Some(rest) => rest,
        };

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let index: usize = rest[..digits].parse().map_err(|_| bad())?;
        let base = *args.get(index)
            .ok_or_else(|| Error::bad_template(format!("argument ${} not bound", index)))?;

        let tail = rest[digits..].trim();
        if tail.is_empty() {
            return Ok(base);
        }

        let (sign, operand) = tail.split_at(1);
        let operand: i64 = operand.trim().parse().map_err(|_| bad())?;
        match sign {
            "+" => base.checked_add(operand).ok_or_else(bad),
            "-" => base.checked_sub(operand).ok_or_else(bad),
            _ => Err(bad()),
        }
    }
}
