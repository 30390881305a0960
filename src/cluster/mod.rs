pub mod router;
pub mod slot;
pub mod topology;

pub use router::ClusterClient;
pub use slot::{hash_slot, hash_tag};
pub use topology::{NodeDescriptor, TopologySnapshot};
