// Entity Models
// Following Rich Hickey's philosophy: "Identity persists, values change"
//
// Each record has:
// - Stable identity derived from its canonical name, never reassigned
// - A current value that the store replaces only when content changes

pub mod bundle;
pub mod stix;

pub use bundle::Bundle;
pub use stix::{EntityKind, ExternalReference, MarkingRefs, StixObject, SPEC_VERSION};
