//! ClinAgent gateway: the HTTP API, the agent runtime (graph engine,
//! specialist scheduler, entity detection, turn runtime, event bus, task
//! supervisor), and process bootstrap.

pub mod api;
pub mod cli;
pub mod runtime;
pub mod state;
