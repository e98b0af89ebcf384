//! Hierarchical step identifiers.
//!
//! Steps are labelled with dotted ordinals: top-level items are `1`, `2`,
//! …; items inside the procedure executed at step 1 are `1.1`, `1.2`, and
//! so on. Labels are assigned in item-index order before dispatch, so
//! parallel execution never perturbs them.

/// A stack of ordinals producing dotted step ids.
#[derive(Debug, Clone, Default)]
pub struct StepCounter {
    stack: Vec<u32>,
}

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a block: subsequent steps gain one more level.
    pub fn enter_block(&mut self) {
        self.stack.push(0);
    }

    /// Leave the innermost block.
    pub fn leave_block(&mut self) {
        self.stack.pop();
    }

    /// Advance to the next step at the current depth and return its id.
    pub fn next_step(&mut self) -> String {
        if let Some(top) = self.stack.last_mut() {
            *top += 1;
        }
        self.step_id()
    }

    /// The current step id, e.g. `"2.1.3"`.
    pub fn step_id(&self) -> String {
        self.stack
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}
