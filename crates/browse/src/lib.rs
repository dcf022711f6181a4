//! Kagami browsing core.
//!
//! [`QueryOrchestrator`] owns the filter state and turns edits into debounced, cancellable
//! catalog queries; [`PreloadBuffer`] holds the visible list until the next one has its
//! leading assets; [`ScrollCoordinator`] restores scroll offsets across navigation.

#![forbid(unsafe_code)]

pub mod config;
pub mod machine;
pub mod model;
pub mod orchestrator;
pub mod page;
pub mod preload;
pub mod scroll;
pub mod snapshot;
mod tasks;

pub use config::BrowseConfig;
pub use machine::{Effect, QueryMachine, QueryPhase};
pub use model::{BrowseView, Committed, Toggle, UiUpdate};
pub use orchestrator::QueryOrchestrator;
pub use page::{BrowsePage, OpenOutcome};
pub use preload::{await_gate, GateOutcome, PreloadBuffer, PreloadConfig, ReadinessGate, SwapDecision};
pub use scroll::{NavigationContext, ScrollCoordinator, ScrollHost, SettleAction};
pub use snapshot::NavSnapshot;
