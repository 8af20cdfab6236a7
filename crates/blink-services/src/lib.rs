//! blink-services — the stateful pieces between the codec and the engine:
//! reassembly, duplicate/cooldown guard, peer registry, collaborator stores
//! and the event subscription.

pub mod event;
pub mod guard;
pub mod peer;
pub mod reassembly;
pub mod store;

pub use event::{Event, Subscription};
pub use guard::{DedupKey, Guard, Verdict};
pub use peer::{PeerRecord, PeerRegistry};
pub use reassembly::{LogicalMessage, Reassembler};
pub use store::{ChatStore, Direction, MatchStore, MemoryChatStore, MemoryMatchStore};
