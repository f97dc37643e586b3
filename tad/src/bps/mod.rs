//! Binary protocol support, the declarative bit-field codec.
//!
//! A protocol header is described by a static list of [`FieldDesc`]s. The order of the list is
//! the wire order. Each field names the label under which its value appears in templates and
//! patterns, its width in bits (zero for a variable length octet string), the kind of value it
//! holds and where its default comes from when neither template nor pattern provide one.
//!
//! ```
//! use tad::bps::{FieldDesc, FragDef, DefaultSrc};
//! use tad::du::EvalCx;
//! use tad::nds::Node;
//!
//! static HEADER: [FieldDesc; 3] = [
//!     FieldDesc::int("version", 4).fixed(1),
//!     FieldDesc::int("type", 4).tx(DefaultSrc::Const(1)),
//!     FieldDesc::int("session-id", 16).both(DefaultSrc::Param("session-id")),
//! ];
//!
//! let params = Node::structure(vec![("session-id", Node::Int(0x1234))]);
//! let def = FragDef::init(&HEADER, Some(&params)).unwrap();
//! let data = def.nds_to_data(None).unwrap();
//! def.confirm_send(&data).unwrap();
//! let bytes = def.generate_vec(&data, &EvalCx::default()).unwrap();
//! assert_eq!(bytes, [0x11, 0x12, 0x34]);
//! ```
//!
//! A [`FragDef`] binds a description to the send and receive defaults of one layer instance, a
//! [`FragData`] carries the values of one template, pattern or received packet.
//!
//! [`FieldDesc`]: struct.FieldDesc.html
//! [`FragDef`]: struct.FragDef.html
//! [`FragData`]: struct.FragData.html
pub mod bits;

use crate::du::{self, DataUnit, DuKind, EvalCx};
use crate::nds::Node;
use crate::{Error, Result};

/// Where the default of a field comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSrc {
    /// No default.
    None,
    /// All bits zero, for fields of any kind and width.
    Zero,
    /// A constant.
    Const(u32),
    /// A labelled parameter of the layer in the CSAP description.
    Param(&'static str),
    /// A labelled parameter, or the constant if the parameter is absent.
    ParamOr(&'static str, u32),
}

/// Compile-time description of one header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    /// The label in templates, patterns and decoded packets.
    pub name: &'static str,
    /// Width in bits, zero for a variable length octet string.
    pub bit_len: usize,
    /// The expected value kind.
    pub kind: DuKind,
    /// Source of the send default.
    pub tx: DefaultSrc,
    /// Source of the receive default.
    pub rx: DefaultSrc,
    /// The layer fills the field when generating, so it needs no value.
    pub computed: bool,
}

/// The field descriptions of a header bound to the defaults of one layer instance.
#[derive(Debug, Clone)]
pub struct FragDef {
    desc: &'static [FieldDesc],
    tx: Vec<DataUnit>,
    rx: Vec<DataUnit>,
}

/// One value per field of a header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragData {
    desc: &'static [FieldDesc],
    dus: Vec<DataUnit>,
}

static UNDEF: DataUnit = DataUnit::Undef;

impl FieldDesc {
    /// An integer field without defaults.
    pub const fn int(name: &'static str, bit_len: usize) -> Self {
        FieldDesc {
            name,
            bit_len,
            kind: DuKind::Int,
            tx: DefaultSrc::None,
            rx: DefaultSrc::None,
            computed: false,
        }
    }

    /// An octet string field without defaults.
    pub const fn octets(name: &'static str, bit_len: usize) -> Self {
        FieldDesc {
            kind: DuKind::Octets,
            ..FieldDesc::int(name, bit_len)
        }
    }

    /// Set the source of the send default.
    pub const fn tx(self, tx: DefaultSrc) -> Self {
        FieldDesc { tx, ..self }
    }

    /// Set the source of the receive default.
    pub const fn rx(self, rx: DefaultSrc) -> Self {
        FieldDesc { rx, ..self }
    }

    /// Use the same default source for sending and receiving.
    pub const fn both(self, src: DefaultSrc) -> Self {
        FieldDesc { tx: src, rx: src, ..self }
    }

    /// A constant field, sent with and required to have this value.
    pub const fn fixed(self, value: u32) -> Self {
        self.both(DefaultSrc::Const(value))
    }

    /// Mark the field as filled in by the layer.
    pub const fn computed(self) -> Self {
        FieldDesc { computed: true, ..self }
    }

    /// Query whether the width depends on the value.
    pub const fn is_variable(&self) -> bool {
        self.bit_len == 0
    }
}

fn materialize(src: DefaultSrc, field: &FieldDesc, params: Option<&Node>) -> Result<DataUnit> {
    let param = |label: &str| -> Result<DataUnit> {
        match params {
            Some(node) => node.read_as(label, field.kind),
            None => Ok(DataUnit::Undef),
        }
    };

    match src {
        DefaultSrc::None => Ok(DataUnit::Undef),
        DefaultSrc::Zero => match field.kind {
            DuKind::Int => Ok(DataUnit::Int(0)),
            DuKind::Octets => Ok(DataUnit::Octets(vec![0; field.bit_len / 8])),
        },
        DefaultSrc::Const(value) => Ok(DataUnit::Int(value)),
        DefaultSrc::Param(label) => param(label),
        DefaultSrc::ParamOr(label, value) => match param(label)? {
            DataUnit::Undef => Ok(DataUnit::Int(value)),
            du => Ok(du),
        },
    }
}

impl FragDef {
    /// Bind a description to the defaults found in the layer parameters.
    ///
    /// This never performs I/O, missing parameters simply leave the default `Undef`.
    pub fn init(desc: &'static [FieldDesc], params: Option<&Node>) -> Result<Self> {
        let tx = desc.iter()
            .map(|field| materialize(field.tx, field, params))
            .collect::<Result<Vec<_>>>()?;
        let rx = desc.iter()
            .map(|field| materialize(field.rx, field, params))
            .collect::<Result<Vec<_>>>()?;
        Ok(FragDef { desc, tx, rx })
    }

    /// The field descriptions.
    pub fn desc(&self) -> &'static [FieldDesc] {
        self.desc
    }

    /// The send default of a field.
    pub fn tx_default(&self, name: &str) -> &DataUnit {
        index_of(self.desc, name).map_or(&UNDEF, |idx| &self.tx[idx])
    }

    /// Provide send and receive defaults for a field that has none yet.
    ///
    /// Used by layers that infer a default from an adjacent layer.
    pub fn infer_default(&mut self, name: &str, du: DataUnit) {
        if let Some(idx) = index_of(self.desc, name) {
            if self.tx[idx].is_undef() {
                self.tx[idx] = du.clone();
            }
            if self.rx[idx].is_undef() {
                self.rx[idx] = du;
            }
        }
    }

    /// Populate values from a template or pattern node.
    ///
    /// Labels without a field are ignored.
    pub fn nds_to_data(&self, node: Option<&Node>) -> Result<FragData> {
        let mut data = FragData::new(self.desc);
        if let Some(node) = node {
            for (du, field) in data.dus.iter_mut().zip(self.desc) {
                *du = node.read_as(field.name, field.kind)?;
            }
        }
        Ok(data)
    }

    /// Check that every field can be generated.
    pub fn confirm_send(&self, data: &FragData) -> Result<()> {
        for (idx, field) in self.desc.iter().enumerate() {
            let du = self.effective_tx(data, idx);
            if du.is_undef() {
                if field.computed {
                    continue;
                }
                return Err(Error::MissingForSend { field: field.name });
            }
            if !du.is_sendable() {
                return Err(Error::bad_template(format!(
                    "`{}` holds a wildcard, can not send", field.name)));
            }
        }
        Ok(())
    }

    /// The value a field is sent with, from the template or else the send default.
    pub fn tx_value<'a>(&'a self, data: &'a FragData, name: &str) -> &'a DataUnit {
        index_of(self.desc, name).map_or(&UNDEF, |idx| self.effective_tx(data, idx))
    }

    fn effective_tx<'a>(&'a self, data: &'a FragData, idx: usize) -> &'a DataUnit {
        match data.dus.get(idx) {
            Some(du) if !du.is_undef() => du,
            _ => &self.tx[idx],
        }
    }

    /// Encode the header into `out`, advancing the running bit offset.
    ///
    /// Computed fields without a value are written as zero.
    pub fn generate(&self, data: &FragData, cx: &EvalCx, out: &mut [u8], bit_offset: &mut usize)
        -> Result<()>
    {
        for (idx, field) in self.desc.iter().enumerate() {
            let du = self.effective_tx(data, idx);
            let written = match du {
                DataUnit::Undef if field.computed => {
                    if field.is_variable() {
                        0
                    } else {
                        let zero = match field.kind {
                            DuKind::Int if field.bit_len <= 32 => DataUnit::Int(0),
                            _ => DataUnit::Octets(Vec::new()),
                        };
                        zero.to_bytes(cx, out, *bit_offset, field.bit_len)?
                    }
                },
                DataUnit::Undef => return Err(Error::MissingForSend { field: field.name }),
                du => du.to_bytes(cx, out, *bit_offset, field.bit_len)?,
            };
            *bit_offset += written;
        }
        Ok(())
    }

    /// Encode the header into a fresh buffer of the exact length.
    pub fn generate_vec(&self, data: &FragData, cx: &EvalCx) -> Result<Vec<u8>> {
        let bitlen = self.data_bitlen(data);
        let mut out = vec![0; (bitlen + 7) / 8];
        let mut offset = 0;
        self.generate(data, cx, &mut out, &mut offset)?;
        if offset != bitlen {
            return Err(Error::Fatal("encoded length differs from the computed length"));
        }
        Ok(out)
    }

    /// Parse the header from `bytes` and test it against a pattern.
    ///
    /// Every parsed field is stored in `pkt`. A variable length field takes the length of the
    /// pattern's octet string, or everything that is left. The first mismatching field fails
    /// with its offset.
    pub fn match_do(
        &self,
        pattern: &FragData,
        pkt: &mut FragData,
        bytes: &[u8],
        bit_offset: &mut usize,
        cx: &EvalCx,
    ) -> Result<()> {
        if pkt.desc.as_ptr() != self.desc.as_ptr() || pkt.dus.len() != self.desc.len() {
            *pkt = FragData::new(self.desc);
        }

        for (idx, field) in self.desc.iter().enumerate() {
            let expected = match pattern.dus.get(idx) {
                Some(du) if !du.is_undef() => du,
                _ => &self.rx[idx],
            };

            let bit_len = if field.is_variable() {
                match expected {
                    DataUnit::Octets(bytes) => bytes.len() * 8,
                    _ => (bytes.len() * 8).saturating_sub(*bit_offset),
                }
            } else {
                field.bit_len
            };

            let value = du::extract(bytes, *bit_offset, bit_len, field.kind)
                .ok_or(Error::Truncated)?;
            pkt.dus[idx] = value.to_du();

            if !expected.matches(value, cx)? {
                return Err(Error::NotMatch { bit_offset: *bit_offset });
            }
            *bit_offset += bit_len;
        }
        Ok(())
    }

    /// The total width if all fields have a fixed width, zero otherwise.
    pub fn pkt_frag_bitlen(&self) -> usize {
        if self.desc.iter().any(FieldDesc::is_variable) {
            0
        } else {
            self.desc.iter().map(|field| field.bit_len).sum()
        }
    }

    /// The total width with variable fields resolved from the values to send.
    pub fn data_bitlen(&self, data: &FragData) -> usize {
        self.desc.iter()
            .enumerate()
            .map(|(idx, field)| if field.is_variable() {
                self.effective_tx(data, idx).bit_length()
            } else {
                field.bit_len
            })
            .sum()
    }
}

impl FragData {
    /// All values `Undef`.
    pub fn new(desc: &'static [FieldDesc]) -> Self {
        FragData {
            desc,
            dus: vec![DataUnit::Undef; desc.len()],
        }
    }

    /// The value of a field, `Undef` for unknown names.
    pub fn get(&self, name: &str) -> &DataUnit {
        index_of(self.desc, name).map_or(&UNDEF, |idx| &self.dus[idx])
    }

    /// The integer value of a field, if set.
    pub fn get_int(&self, name: &str) -> Option<u32> {
        self.get(name).as_int()
    }

    /// The octets of a field, if set.
    pub fn get_octets(&self, name: &str) -> Option<&[u8]> {
        self.get(name).as_octets()
    }

    /// Query whether a field has a value.
    pub fn is_set(&self, name: &str) -> bool {
        !self.get(name).is_undef()
    }

    /// Replace the value of a field.
    pub fn set(&mut self, name: &str, du: DataUnit) -> Result<()> {
        let idx = index_of(self.desc, name)
            .ok_or(Error::Fatal("no such field"))?;
        self.dus[idx] = du;
        Ok(())
    }

    /// Set a field only if it has no value yet.
    pub fn set_if_undef(&mut self, name: &str, du: DataUnit) -> Result<()> {
        if self.get(name).is_undef() {
            self.set(name, du)?;
        }
        Ok(())
    }

    /// The labelled values that are set, as a structure node.
    pub fn to_node(&self) -> Node {
        Node::structure(self.desc.iter()
            .zip(&self.dus)
            .filter_map(|(field, du)| du.to_node().map(|node| (field.name, node))))
    }

    /// Append the set values to an existing structure node.
    pub fn write_into(&self, node: &mut Node) -> Result<()> {
        for (field, du) in self.desc.iter().zip(&self.dus) {
            if let Some(value) = du.to_node() {
                node.write(field.name, value)?;
            }
        }
        Ok(())
    }
}

fn index_of(desc: &[FieldDesc], name: &str) -> Option<usize> {
    desc.iter().position(|field| field.name == name)
}
