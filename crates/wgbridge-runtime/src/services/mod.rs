// ============================================
// File: crates/wgbridge-runtime/src/services/mod.rs
// ============================================
//! # Runtime Services
//!
//! ## Main Functionality
//! - `registry`: Handle table and tunnel lifecycle
//! - `reactor`: Debounced endpoint re-resolution on network change
//! - `rebind`: Bounded-retry socket rebind
//! - `diagnostics`: `SIGUSR2` stack trace reports
//!
//! ## Task Layout
//! ```text
//! Bridge runtime
//!   ├── NetworkReactor::run          (one)
//!   ├── RouteMonitor::run            (one, if watch_routes)
//!   ├── diagnostics listener         (one)
//!   ├── debounce timers              (one per Pending tunnel)
//!   └── rebind loops                 (one per wgBumpSockets call)
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial services module

pub mod diagnostics;
pub mod reactor;
pub mod rebind;
pub mod registry;

pub use reactor::NetworkReactor;
pub use registry::{IoSource, RegistryError, ReresolveStatus, TunnelRegistry};
