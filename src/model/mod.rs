//! Entity types shared by the local store, the sync client, and the
//! remote authority.

pub mod inbox;
pub mod link;
pub mod meta;
pub mod note;
pub mod op;
pub mod plan;
pub mod task;

pub use inbox::InboxItem;
pub use link::NoteTaskLink;
pub use meta::MetaItem;
pub use note::Note;
pub use op::{OpKind, OpStatus, OpsQueueItem};
pub use plan::{Plan, PlanBlock, PlanDecision, PlanGoal, PlanPhase, PlanPhaseStatus, PlanStatus};
pub use task::{Recurrence, Subtask, SubtaskStatus, Task, TaskStatus};
