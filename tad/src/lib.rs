//! A packet crafting and matching engine driven by symbolic layer templates.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Highlights](#highlights)
//! 2. [Design](#design-and-relevant-core-concepts)
//! 3. [Notation of templates and patterns](nds/index.html)
//! 4. [Data units](du/index.html)
//! 5. [The bit-field codec](bps/index.html)
//! 6. [The layers](layer/index.html)
//!    1. [Ethernet](layer/eth/index.html)
//!    1. [Ip V4](layer/ip4/index.html) and [Ip V6](layer/ip6/index.html)
//!    1. [Icmp](layer/icmp4/index.html) and [Igmp](layer/igmp/index.html)
//!    1. [Udp](layer/udp/index.html) and [Tcp](layer/tcp/index.html)
//!    1. [Atm](layer/atm/index.html), [Aal5](layer/aal5/index.html), [Ppp and
//!       PPPoE](layer/ppp/index.html)
//!    1. [Dhcp](layer/dhcp/index.html)
//! 7. [Layer stacks](stack/index.html) and [CSAPs](csap/index.html)
//! 8. [Send queues](sendq/index.html) and the [forwarder](forwarder/index.html)
//! 9. [Endpoints](nic/index.html)
//!
//! ## Highlights
//!
//! * One declarative field list per header drives both encoding and matching.
//! * Templates iterate over value ranges and scripts, one frame per combination.
//! * Frames are scatter/gather lists, headers are prepended without copying the payload.
//! * Optional raw socket endpoints, software loop-backs for everything else.
//!
//! ## Design and relevant core concepts
//!
//! A CSAP (communication service access point) owns an ordered stack of protocol layers over an
//! [endpoint]. Sending walks the stack top-down: each layer turns its part of the template into
//! header octets around the packet produced by the layer above. Receiving walks a frame
//! bottom-up: each layer matches its header against the pattern, strips it and hands the rest
//! upwards. Matched frames are reported as trees in the same [notation] templates are written in.
//!
//! The [`Runtime`] owns CSAPs, [send queues] and [forwarder tasks] by id or name. There is no
//! global state, a test creates one runtime per scenario.
//!
//! [endpoint]: nic/trait.Endpoint.html
//! [notation]: nds/index.html
//! [`Runtime`]: runtime/struct.Runtime.html
//! [send queues]: sendq/index.html
//! [forwarder tasks]: forwarder/index.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;

pub mod bps;
pub mod config;
pub mod csap;
pub mod du;
pub mod error;
pub mod forwarder;
pub mod layer;
pub mod log;
pub mod nds;
pub mod nic;
pub mod packet;
pub mod runtime;
pub mod sendq;
pub mod stack;
pub mod time;
pub mod wire;

pub use self::error::{Error, Result};
pub use self::runtime::Runtime;
