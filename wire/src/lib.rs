//! Snapshot packet layout and transport contract for ghostsnap.
//!
//! This crate handles the binary layout around the per-chunk update records:
//! the snapshot header, new-type announcements, back-patched section lengths
//! and the despawn list. It also defines the transport collaborator the
//! sender writes packets into. It knows nothing about ghost state.
//!
//! # Design Principles
//!
//! - **Bit-exact layout** - Field widths are fixed and documented per module.
//! - **Bounded decoding** - Counts are validated against [`Limits`] before iteration.
//! - **No domain knowledge** - Update records are opaque bytes here.

mod error;
mod header;
mod limits;
mod snapshot;
mod transport;

pub use error::{DecodeError, EncodeError, EncodeResult, LimitKind, Section, WireResult};
pub use header::{SnapshotHeader, HEADER_BITS, SNAPSHOT_PROTOCOL_TAG};
pub use limits::Limits;
pub use snapshot::{
    decode_snapshot, write_despawn_list, write_prelude, DecodedSnapshot, LengthPlaceholders,
    SnapshotPrelude, TypeAnnouncement,
};
pub use transport::{
    select_channel, ChannelKind, LoopbackTransport, SendBuffer, SnapshotTransport,
    TransportError,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = SNAPSHOT_PROTOCOL_TAG;
        let _ = HEADER_BITS;
        let _ = Limits::default();
        let _ = SnapshotPrelude::default();
        let _ = ChannelKind::Unreliable;
        let _: WireResult<()> = Ok(());
        let _: EncodeResult<()> = Ok(());
    }

    #[test]
    fn header_fits_in_whole_bytes() {
        assert_eq!(HEADER_BITS % 8, 0);
        assert_eq!(HEADER_BITS / 8, 18);
    }
}
