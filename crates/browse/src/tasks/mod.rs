//! Background tasks spawned by the orchestrator. Each one reports through `UiUpdate`.

#![forbid(unsafe_code)]

pub(crate) mod names;
pub(crate) mod prefetch;
pub(crate) mod query;
