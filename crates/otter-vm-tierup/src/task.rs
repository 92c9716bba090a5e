//! The unit of work handed to the optimizer thread.

use std::fmt;

/// Identity of the function a task optimizes.
///
/// Keyed by `(module_id, function_index)`, the same key the JIT queue and
/// code cache use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    /// Owning module.
    pub module_id: u64,
    /// Index of the function inside its module.
    pub function_index: u32,
}

impl FunctionKey {
    /// Create a key.
    pub const fn new(module_id: u64, function_index: u32) -> Self {
        Self {
            module_id,
            function_index,
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.module_id, self.function_index)
    }
}

/// A recompilation job.
///
/// The optimizer owns the task from `submit` until it is handed back through
/// exactly one of: [`install`](Self::install),
/// [`restore_original_code`](Self::restore_original_code), or being dropped
/// (failed compile, stale OSR slot, discard during shutdown). Where the task
/// currently lives encodes its compile state: the input queue holds pending
/// tasks, the output queue and OSR buffer hold successfully compiled ones.
pub trait RecompileTask: Send + 'static {
    /// Reason a compile did not produce code.
    type Error: fmt::Display;

    /// Function this task optimizes.
    fn function(&self) -> FunctionKey;

    /// Bytecode offset of the activation to enter, for OSR tasks.
    fn osr_pc_offset(&self) -> Option<u32> {
        None
    }

    /// Build optimized code. Runs on the optimizer thread only.
    ///
    /// An error is an ordinary speculative outcome: the task is dropped and
    /// nothing is reported back.
    fn compile(&mut self) -> Result<(), Self::Error>;

    /// Whether the target can still receive the compiled code. Checked on the
    /// owning thread right before installation.
    fn is_target_valid(&self) -> bool {
        true
    }

    /// Apply the compiled code to the target. Owning thread only.
    fn install(self);

    /// Put the target back on its unoptimized code. Owning thread only.
    fn restore_original_code(self);
}

/// The `(function, osr offset)` pair of a task, copied out so it can be
/// published while the task itself is owned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskSite {
    pub(crate) function: FunctionKey,
    pub(crate) osr_pc_offset: Option<u32>,
}

impl TaskSite {
    pub(crate) fn of<T: RecompileTask>(task: &T) -> Self {
        Self {
            function: task.function(),
            osr_pc_offset: task.osr_pc_offset(),
        }
    }

    pub(crate) fn is_osr_for(&self, function: FunctionKey, pc_offset: Option<u32>) -> bool {
        self.function == function
            && match pc_offset {
                Some(offset) => self.osr_pc_offset == Some(offset),
                None => self.osr_pc_offset.is_some(),
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_key_display() {
        assert_eq!(FunctionKey::new(3, 14).to_string(), "3#14");
    }

    #[test]
    fn site_matching() {
        let function = FunctionKey::new(1, 2);
        let osr = TaskSite {
            function,
            osr_pc_offset: Some(40),
        };
        let regular = TaskSite {
            function,
            osr_pc_offset: None,
        };

        assert!(osr.is_osr_for(function, Some(40)));
        assert!(osr.is_osr_for(function, None));
        assert!(!osr.is_osr_for(function, Some(41)));
        assert!(!osr.is_osr_for(FunctionKey::new(1, 3), None));
        assert!(!regular.is_osr_for(function, None));
    }
}
