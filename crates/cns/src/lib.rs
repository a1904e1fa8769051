//! Central state fusion: the single source of truth for user/agent
//! activity and turn memory that every other component treats as
//! authoritative.

mod cns;
mod memory;
mod state;

pub use cns::{Cns, DialogState, DialogStateEvent, Timelines};
pub use memory::{Memory, Speaker};
pub use state::{AgentState, UserState};
