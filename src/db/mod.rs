pub mod persistent;

pub use persistent::{Checkpoint, PersistentStateDB};
