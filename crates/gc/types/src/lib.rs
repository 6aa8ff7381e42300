//! Commonly used types for the account-state garbage collector.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
mod event;

pub use config::{GcConfig, GcConfigError, DEFAULT_GC_HISTORY, DEFAULT_GC_INTERVAL};
pub use event::{BlockKind, GcEvent, QuiesceOutcome, TopChanged};
