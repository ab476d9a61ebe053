//! Clock and reset capabilities.
//!
//! The device model outside this crate owns the global cycle counter and
//! calls [`Clockable::advance`] on every registered component once per
//! cycle, in a fixed order of its choosing. [`ClockDomain`] is a minimal
//! driver of that kind for standalone runs.

use crate::error::Result;

/// A component that does work once per global cycle.
pub trait Clockable {
    /// Perform this component's work for `cycle`.
    fn advance(&mut self, cycle: u64) -> Result<()>;
}

/// A component whose mutable state can be returned to power-on values.
///
/// Reset never reloads schemas; those are immutable after construction.
pub trait Resettable {
    fn reset(&mut self);
}

/// Drives a fixed, ordered set of clockable components.
pub struct ClockDomain<'a> {
    components: Vec<&'a mut dyn Clockable>,
    cycle: u64,
}

impl<'a> ClockDomain<'a> {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            cycle: 0,
        }
    }

    /// Register a component; components advance in registration order.
    pub fn register(&mut self, component: &'a mut dyn Clockable) {
        self.components.push(component);
    }

    /// Current cycle number (the next cycle to be run).
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Advance every component by one cycle.
    pub fn tick(&mut self) -> Result<()> {
        let cycle = self.cycle;
        for component in self.components.iter_mut() {
            component.advance(cycle)?;
        }
        self.cycle += 1;
        Ok(())
    }

    /// Run `cycles` cycles, stopping at the first error.
    pub fn run(&mut self, cycles: u64) -> Result<()> {
        for _ in 0..cycles {
            self.tick()?;
        }
        Ok(())
    }
}

impl Default for ClockDomain<'_> {
    fn default() -> Self {
        Self::new()
    }
}
