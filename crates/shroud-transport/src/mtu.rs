//! MTU constants and the probe ladder for path-MTU discovery.
//!
//! Every connection opens at [`START_MTU`]; once traffic flows, the
//! surrounding layer probes upward along [`probe_sizes`] with DF-bit
//! datagrams and settles on the largest size that survives the path.

/// Smallest MTU worth running on (IPv6 minimum).
pub const MIN_MTU: usize = 1280;

/// Largest MTU probed for (jumbo frames).
pub const MAX_MTU: usize = 9000;

/// Size of the first dialer datagram; handshake packets pad to this.
pub const START_MTU: usize = shroud_core::START_MTU;

/// Common on-path MTU plateaus, ascending.
///
/// Probing walks plateaus instead of binary-searching: real paths cluster
/// on these values (IPv6 floor, PPPoE, plain Ethernet, then jumbo steps).
const PLATEAUS: [usize; 6] = [MIN_MTU, START_MTU, 1492, 1500, 4096, MAX_MTU];

/// Probe sizes worth trying above `current`, ascending.
#[must_use]
pub fn probe_sizes(current: usize) -> Vec<usize> {
    PLATEAUS.iter().copied().filter(|&s| s > current).collect()
}
