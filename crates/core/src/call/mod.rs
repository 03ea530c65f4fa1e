//! Call session: state, transitions and the controller task

mod controller;
mod machine;
mod state;

pub use controller::{CallController, CallDeps, CallHandle};
pub use machine::{CallMachine, Effect};
pub use state::{CallState, CallView, Notice, NoticeLevel, RemoteParty, SignalingStatus};
