//! Pipeline stages for archive-to-PDF compilation.
//!
//! Each submodule implements exactly one step and is testable on its own;
//! [`crate::compile`] strings them together and owns the workspace.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ workspace ──▶ extract ──▶ compiler ──▶ artifact
//! (bytes)   (temp dir)    (bounded)   (2 passes)   (PDF)
//!                                         │
//!                                         └──▶ diagnose (on failure)
//! ```
//!
//! 1. [`input`]     — load the upload from a path or URL under the size ceiling
//! 2. [`workspace`] — create, resolve inside, and remove the per-request dir
//! 3. [`extract`]   — unpack entries with size budgeting and traversal
//!    rejection; runs in `spawn_blocking`
//! 4. [`compiler`]  — spawn the compiler twice against one deadline and
//!    capture a bounded output tail
//! 5. [`artifact`]  — locate and open `<entry stem>.pdf`
//! 6. [`diagnose`]  — pull the first TeX error out of a failed run's log

pub mod artifact;
pub mod compiler;
pub mod diagnose;
pub mod extract;
pub mod input;
pub mod workspace;
