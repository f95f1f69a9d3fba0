//! # BOS Process
//!
//! Low-level process operations for the BrowserOS server supervisor.
//!
//! Cross-platform primitives for:
//! - Process spawning
//! - Process existence verification
//! - Process termination (graceful and forceful)
//! - Bounded waiting for process exit
//! - Process creation-time lookup (for orphan identity checks)

pub mod check;
pub mod execute;
pub mod info;
pub mod terminate;
pub mod wait;

pub use check::*;
pub use execute::*;
pub use info::*;
pub use terminate::*;
pub use wait::*;
