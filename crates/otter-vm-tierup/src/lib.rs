//! # Otter VM Tier-Up
//!
//! Concurrent recompilation for hot functions:
//! - one dedicated optimizer thread per owning VM thread
//! - unbounded input / output queues with a backpressure gate
//! - a fixed-size ring buffer caching finished on-stack-replacement results
//! - stop / flush handshakes that drain in-flight work
//!
//! ## Flow
//!
//! ```text
//! owning thread                         optimizer thread
//!   submit ──► input queue ──────────►  compile
//!                                         ├─ regular ──► output queue
//!                                         └─ OSR ──────► OSR ring buffer
//!   install_optimized_functions ◄──────── output queue
//!   find_ready_osr_candidate ◄─────────── OSR ring buffer
//! ```
//!
//! ## Example
//!
//! ```
//! use otter_vm_tierup::{BackgroundOptimizer, FunctionKey, RecompileTask, TierUpConfig};
//!
//! struct Recompile {
//!     function: FunctionKey,
//!     code: Option<Vec<u8>>,
//! }
//!
//! impl RecompileTask for Recompile {
//!     type Error = String;
//!
//!     fn function(&self) -> FunctionKey {
//!         self.function
//!     }
//!
//!     fn compile(&mut self) -> Result<(), String> {
//!         self.code = Some(vec![0xC3]);
//!         Ok(())
//!     }
//!
//!     fn install(self) {
//!         assert!(self.code.is_some());
//!     }
//!
//!     fn restore_original_code(self) {}
//! }
//!
//! let mut optimizer = BackgroundOptimizer::start(TierUpConfig::default())?;
//! if optimizer.is_queue_available() {
//!     optimizer.submit(Recompile {
//!         function: FunctionKey::new(1, 0),
//!         code: None,
//!     });
//! }
//!
//! while optimizer.stats().compiled == 0 {
//!     std::thread::yield_now();
//! }
//! assert_eq!(optimizer.install_optimized_functions(), 1);
//! optimizer.stop();
//! # Ok::<(), otter_vm_tierup::TierUpError>(())
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

mod config;
mod control;
mod error;
mod optimizer;
mod osr_buffer;
mod queue;
mod signal;
mod stats;
mod task;
mod worker;

pub use config::{DEFAULT_MAX_QUEUE_LENGTH, DEFAULT_THREAD_NAME, OSR_BUFFER_SLACK, TierUpConfig};
pub use control::StopFlag;
pub use error::TierUpError;
pub use optimizer::BackgroundOptimizer;
pub use stats::TierUpStats;
pub use task::{FunctionKey, RecompileTask};
