//! Gym-style reinforcement learning environment around an agent-based cell
//! simulation, plus a drift harness that checks seeded episodes replay
//! bit for bit.

pub mod drift;
pub mod error;
pub mod gym;
pub mod io;
pub mod model;
pub mod prelude;
pub mod render;
pub mod settings;
pub mod sim;
pub mod timeseries;
