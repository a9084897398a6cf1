/// Deterministic event orderings

use super::Event;
use std::cmp::Ordering;

/// Local insertion order; parents always precede children
pub fn topological_order(a: &Event, b: &Event) -> Ordering {
    a.topological_index.cmp(&b.topological_index)
}

/// Total order of events received in the same round.
///
/// Lamport timestamp first, then the signature `r` value compared as a
/// big-endian integer, then the event hash so the order is total even for
/// malformed signatures.
pub fn consensus_order(a: &Event, b: &Event) -> Ordering {
    a.lamport
        .cmp(&b.lamport)
        .then_with(|| a.signature_r().cmp(&b.signature_r()))
        .then_with(|| a.hash().cmp(&b.hash()))
}
