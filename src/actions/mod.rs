//! Session actions (C7): named, ordered steps a controller tick runs against an open session.
//! Actions never bind or evict on their own — they mutate the session (task status, node usage,
//! `binds`/`evictions`) and the controller publishes the results after `close_session`.

pub mod allocate;
pub mod preempt;

use crate::session::Session;

pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, session: &mut Session);
}

pub use allocate::Allocate;
pub use preempt::Preempt;
