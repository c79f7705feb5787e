//! Interception hooks.
//!
//! - `script` - the hook rule language and its compiler
//! - `sandbox` - limited, per-run evaluation of compiled scripts
//! - `pipeline` - ordered pre/post execution and hook administration

mod pipeline;
mod sandbox;
mod script;

pub use pipeline::{CompiledHook, HookAdminError, HookPipeline, PhaseOutcome};
pub use sandbox::{Sandbox, ScriptOutcome};
pub use script::{READABLE_ROOTS, Script, ScriptError, WRITABLE_ROOTS};
