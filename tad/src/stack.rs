//! An ordered stack of layer instances.
//!
//! The stack is the part of a CSAP that turns templates into frames and frames into matched
//! results. It performs no I/O and can be driven directly:
//!
//! ```
//! use tad::nds::{Node, Template, Payload};
//! use tad::stack::Stack;
//!
//! let mut stack = Stack::new(&[
//!     Node::choice("udp", Node::structure(vec![
//!         ("local-port", Node::Int(4000)),
//!         ("remote-port", Node::Int(53)),
//!     ])),
//! ]).unwrap();
//!
//! let template = Template::new(vec![]).with_payload(Payload::Bytes(b"hi".to_vec()));
//! let packets = stack.build(&template, None).unwrap();
//! assert_eq!(packets[0].to_vec(), [0x0f, 0xa0, 0, 53, 0, 10, 0, 0, b'h', b'i']);
//! ```
use bytes::Bytes;

use crate::du::{EvalCx, Evaluator};
use crate::layer::{self, GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};
use crate::nds::{Node, Pattern, Template};
use crate::packet::Packet;
use crate::{Error, Result};

/// The layers of one CSAP, top-most first.
pub struct Stack {
    kinds: Vec<LayerKind>,
    layers: Vec<Box<dyn Layer>>,
}

/// A frame that matched one unit of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Index of the matching pattern unit.
    pub unit: usize,
    /// The parsed PDUs, top-most first, each a choice labelled with its layer.
    pub pdus: Vec<Node>,
    /// What remains above the top-most layer.
    pub payload: Bytes,
}

/// Split a labelled PDU and check its label against the layer.
fn layer_pdu<'a>(pdus: &'a [Node], idx: usize, kind: LayerKind) -> Result<Option<&'a Node>> {
    match pdus.get(idx) {
        None => Ok(None),
        Some(Node::Choice(label, value)) if label == kind.label() => Ok(Some(value)),
        Some(Node::Choice(label, _)) => Err(Error::bad_template(format!(
            "PDU {} is labelled `{}` but the layer is `{}`", idx, label, kind))),
        Some(_) => Err(Error::bad_template(format!("PDU {} is not labelled with its layer", idx))),
    }
}

fn check_depth(pdus: &[Node], depth: usize) -> Result<()> {
    if pdus.len() > depth {
        return Err(Error::bad_template(format!(
            "{} PDUs for a stack of {} layers", pdus.len(), depth)));
    }
    Ok(())
}

impl Stack {
    /// Create the layers from their CSAP descriptions.
    ///
    /// Each description is a choice whose label names the layer and whose value holds the
    /// layer parameters.
    pub fn new(descs: &[Node]) -> Result<Self> {
        if descs.is_empty() {
            return Err(Error::invalid("a CSAP needs at least one layer"));
        }

        let mut kinds = Vec::with_capacity(descs.len());
        let mut params = Vec::with_capacity(descs.len());
        for desc in descs {
            let (label, value) = desc.as_choice()
                .ok_or_else(|| Error::invalid("layer description must be labelled"))?;
            let kind = LayerKind::from_label(label)
                .ok_or_else(|| Error::invalid(format!("unknown layer `{}`", label)))?;
            kinds.push(kind);
            params.push(value);
        }

        let layers = params.iter()
            .enumerate()
            .map(|(idx, params)| layer::init(StackInfo { kinds: &kinds, idx }, Some(params)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(layers = %kinds.iter().map(|kind| kind.label()).collect::<Vec<_>>().join("."),
            "created layer stack");
        Ok(Stack { kinds, layers })
    }

    /// The layer kinds, top-most first.
    pub fn kinds(&self) -> &[LayerKind] {
        &self.kinds
    }

    /// The number of layers.
    pub fn depth(&self) -> usize {
        self.kinds.len()
    }

    /// Confirm every PDU of a template, top-most first.
    pub fn confirm_tmpl(&mut self, tmpl: &Template) -> Result<Vec<Pdu>> {
        check_depth(&tmpl.pdus, self.depth())?;
        let kinds = &self.kinds;
        self.layers.iter_mut()
            .enumerate()
            .map(|(idx, layer)| layer.confirm_tmpl(layer_pdu(&tmpl.pdus, idx, kinds[idx])?))
            .collect()
    }

    /// Generate the packets of one argument combination from confirmed PDUs.
    pub fn generate(&mut self, pdus: &[Pdu], payload: Vec<u8>, eval: EvalCx) -> Result<Vec<Packet>> {
        if pdus.len() != self.depth() {
            return Err(Error::Fatal("PDU count differs from the stack depth"));
        }

        let kinds = &self.kinds;
        let mut packets = vec![Packet::from_vec(payload)];
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            let cx = GenCx { stack: StackInfo { kinds, idx }, pdus, eval };
            packets = layer.generate(&cx, &pdus[idx], packets)?;
        }
        Ok(packets)
    }

    /// Confirm a template and generate the packets of all its argument combinations.
    pub fn build(&mut self, tmpl: &Template, evaluator: Option<&dyn Evaluator>)
        -> Result<Vec<Packet>>
    {
        let pdus = self.confirm_tmpl(tmpl)?;
        let payload = tmpl.payload_bytes();
        let mut packets = Vec::new();
        let result = tmpl.arg_combinations()
            .iter()
            .try_for_each(|args| {
                let eval = EvalCx { evaluator, args };
                packets.extend(self.generate(&pdus, payload.clone(), eval)?);
                Ok(())
            });
        self.release(pdus);
        result.map(|()| packets)
    }

    /// Confirm every unit of a pattern.
    pub fn confirm_ptrn(&mut self, ptrn: &Pattern) -> Result<Vec<Vec<Pdu>>> {
        if ptrn.units.is_empty() {
            return Err(Error::bad_template("pattern without units"));
        }

        let kinds = &self.kinds;
        let layers = &mut self.layers;
        ptrn.units.iter()
            .map(|unit| {
                check_depth(&unit.pdus, kinds.len())?;
                layers.iter_mut()
                    .enumerate()
                    .map(|(idx, layer)| layer.confirm_ptrn(layer_pdu(&unit.pdus, idx, kinds[idx])?))
                    .collect()
            })
            .collect()
    }

    /// Match a captured frame against the confirmed units of a pattern, in order.
    ///
    /// The frame is handed to the bottom-most layer first. Returns `None` if no unit matches,
    /// errors other than a mismatch abort the match.
    pub fn match_frame(
        &mut self,
        units: &[Vec<Pdu>],
        frame: Bytes,
        frame_seq: u64,
        evaluator: Option<&dyn Evaluator>,
    ) -> Result<Option<Matched>> {
        let depth = self.depth();
        'units: for (unit_idx, unit) in units.iter().enumerate() {
            let mut cx = MatchCx {
                stack: StackInfo { kinds: &self.kinds, idx: depth - 1 },
                eval: EvalCx { evaluator, args: &[] },
                frame_seq,
                atm_u2u: None,
            };

            let mut parsed = Vec::with_capacity(depth);
            let mut sdu = frame.clone();
            for idx in (0..depth).rev() {
                cx.stack.idx = idx;
                let layer = &mut self.layers[idx];
                let mut pkt = layer.match_pre(&unit[idx])?;
                match layer.match_do(&mut cx, &unit[idx], &mut pkt, sdu) {
                    Ok(rest) => sdu = rest,
                    Err(err) if err.is_mismatch() => {
                        tracing::trace!(unit = unit_idx, layer = %self.kinds[idx], %err, "no match");
                        continue 'units;
                    },
                    Err(err) => return Err(err),
                }
                parsed.push(pkt);
            }

            // Parsed bottom-most first.
            parsed.reverse();
            let mut pdus = Vec::with_capacity(depth);
            for ((layer, kind), pkt) in self.layers.iter_mut().zip(&self.kinds).zip(parsed) {
                let node = layer.match_post(&pkt)?;
                layer.release_pdu(pkt);
                pdus.push(Node::choice(kind.label(), node));
            }
            return Ok(Some(Matched { unit: unit_idx, pdus, payload: sdu }));
        }
        Ok(None)
    }

    /// Release confirmed PDUs, one per layer.
    pub fn release(&mut self, pdus: Vec<Pdu>) {
        for (layer, pdu) in self.layers.iter_mut().zip(pdus) {
            layer.release_pdu(pdu);
        }
    }

    /// Release the confirmed units of a pattern.
    pub fn release_units(&mut self, units: Vec<Vec<Pdu>>) {
        for unit in units {
            self.release(unit);
        }
    }
}
