mod persist;
mod reconcile;
mod session;

pub use persist::{persist, MergePlan, PersistOutcome, DELETE_FLAG};
pub use reconcile::{has_changes, key_of, reconcile, ChangeRow, ChangeSet, KeyTuple};
pub use session::{EditorSession, SessionStore, TableSession};
