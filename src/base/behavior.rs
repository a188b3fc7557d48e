/// Common behaviors of every clocked module in the simulator.
pub trait ModuleBehaviors {
    /// Advance the module by one clock cycle.
    fn tick_one(&mut self);

    /// Return the module to its power-on state.
    fn reset(&mut self) {}
}
