//! Reliable-multicast and VMCI protocol slots.
//!
//! PGM, EPGM, and VMCI are declared in the protocol enumeration so endpoint
//! URLs parse and pattern validation works, but no wire implementation is
//! provided. Bind and connect surface [`Error::NotImplemented`] without
//! disturbing the rest of the transport surface.

use crate::error::Error;
use crate::transport::Protocol;

pub(crate) fn not_implemented(protocol: Protocol) -> Error {
    debug_assert!(matches!(
        protocol,
        Protocol::Pgm | Protocol::Epgm | Protocol::Vmci
    ));
    Error::NotImplemented(protocol.scheme())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_slots_report_not_implemented() {
        for protocol in [Protocol::Pgm, Protocol::Epgm, Protocol::Vmci] {
            let err = not_implemented(protocol);
            assert!(matches!(err, Error::NotImplemented(_)));
        }
    }
}
