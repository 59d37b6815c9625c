//! Real-time vector link between a motion rig and a simulator.
//!
//! Two endpoints exchange fixed-length numeric vectors at a fixed rate. The
//! link starts over TCP with an identity handshake that fixes both vector
//! sizes and may then move steady-state traffic to UDP.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP/UDP sockets with the one-way TCP to UDP switch
//! - [`frame`]: fixed-length checksummed vector frames
//! - [`record`]: bounded recording of sent frames to daily files
//! - [`peer`]: handshake, sessions, threaded link runtime (behind `peer`)
//! - [`source`]: vector sources for control loops

pub mod source;

/// Re-export transport types.
pub mod transport {
    pub use riglink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use riglink_frame::*;
}

/// Re-export recording types.
pub mod record {
    pub use riglink_record::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use riglink_peer::*;
}
