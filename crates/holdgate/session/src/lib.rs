//! Holdgate Session - binding of human authority to execution surfaces.
//!
//! Foreground visibility and authority are independent booleans. Re-entry
//! events (app resume, deep link, notification tap) only ever touch the
//! foreground flag; authority comes exclusively from `bind`, called in direct
//! response to an explicit human rebind gesture. Backgrounding or killing a
//! surface clears its bound session before anything else can observe the
//! transition.

#![deny(unsafe_code)]

pub mod error;
pub mod lifecycle;
pub mod registry;

pub use error::SessionError;
pub use lifecycle::{AuthorizationSession, SessionConfig, SessionLifecycle};
pub use registry::{SessionOracle, SurfaceRegistry};
