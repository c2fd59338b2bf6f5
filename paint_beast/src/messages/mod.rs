//! Control messages and stats snapshots for actor and learner threads.
//!
//! ```text
//!        Runtime
//!     ┌─────┴───────────────┐
//!     v                     v
//! +----------+        +-----------+
//! | Actor    |        | Learner   |
//! | cmd/stats|        | cmd/stats |
//! +----------+        +-----------+
//! ```

mod actor_msg;
mod learner_msg;

pub use actor_msg::{ActorMsg, ActorStats};
pub use learner_msg::{LearnerMsg, LearnerStats};
