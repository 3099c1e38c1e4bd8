//! Generation sessions: from a validated request to a terminal status.
//!
//! ## Module Map
//!
//! ```text
//!   GenerateRequest ──> models.rs  (GenerationSession, Backend, SessionStatus)
//!                          │
//!                          │ InvocationBuilder::build()
//!                          v
//!                       invocation.rs  (WorkerInvocation, Credentials)
//!                          │
//!                          │ SessionOrchestrator::run()
//!                          v
//!                       orchestrator.rs ──── cancel.rs (CancellationController,
//!                          │                             SessionRegistry)
//!                          │ WorkerLauncher::launch()
//!                          v
//!                       worker.rs  (WorkerProcess trait, LocalLauncher)
//! ```
//!
//! `sandbox.rs` reuses the launcher and builder to run the sandbox removal
//! script outside of any session.
//!
//! ## Session Flow
//!
//! 1. The request is validated and its `WorkerInvocation` derived. Missing
//!    credentials or a follow-up without a sandbox fail here; nothing runs.
//! 2. The worker is started and its stdout decoded into frames while stderr
//!    is read line by line.
//! 3. Frames become `StreamEvent`s on the session channel. Plain lines also
//!    feed sandbox id and preview URL extraction.
//! 4. On exit the session ends with exactly one of `Complete`, a fatal
//!    `Error`, or nothing at all when it was cancelled.

pub mod cancel;
pub mod invocation;
pub mod models;
pub mod orchestrator;
pub mod sandbox;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
