//! Host stepping contract.
//!
//! A co-simulation host drives every bus model through the same small set
//! of calls: lifecycle transitions, time steps, and the event protocol in
//! which clocks tick and binary variables carrying encoded operations are
//! exchanged. [`BusModel`] is the model side of that contract and
//! [`Instance`] enforces the lifecycle around it.
//!
//! # Lifecycle
//!
//! ```text
//! Instantiated -> InitializationMode -> EventMode <-> StepMode
//!                                           \            /
//!                                            Terminated
//! ```
//!
//! Any error returned by the model is fatal: the instance logs it, moves
//! to `Terminated` and rejects every later call with [`Error::Terminated`].
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::Instance;
//! use flexray_sim::flexray::FlexRayNode;
//! use flexray_sim::types::ClockType;
//!
//! let mut node = Instance::new("node1", FlexRayNode::new(ClockType::Countdown));
//! node.enter_initialization_mode()?;
//! node.exit_initialization_mode()?;
//! node.enter_step_mode()?;
//! let event_needed = node.do_step(0.0, 0.001)?;
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use log::{error, trace};

use crate::types::{IntervalFraction, ValueReference, ns_to_time, time_to_ns};
use crate::{Error, Result};

/// Model side of the host stepping contract.
///
/// All times are simulation times in nanoseconds. Methods that a model does
/// not support keep their default implementation, which rejects the value
/// reference.
pub trait BusModel {
    /// Prepare the model for simulation. Called when the host leaves
    /// initialization mode.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Advance from `current_ns` to `target_ns`. Returns whether the host
    /// must enter event mode before the next step.
    fn do_step(&mut self, current_ns: u64, target_ns: u64) -> Result<bool>;

    /// Compute outputs from the current inputs. Must be idempotent until the
    /// next [`BusModel::update_discrete_states`].
    fn evaluate_discrete_states(&mut self) -> Result<()>;

    /// End the current event: reset clock activations and consumed buffers.
    fn update_discrete_states(&mut self) -> Result<()>;

    /// Deliver encoded operations to a receive variable.
    fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()>;

    /// Read encoded operations from a transmit variable.
    fn get_binary(&mut self, vr: ValueReference) -> Result<Vec<u8>>;

    /// Activate or deactivate a clock.
    fn set_clock(&mut self, vr: ValueReference, active: bool) -> Result<()>;

    /// Read a clock raised by the model itself.
    fn get_clock(&mut self, vr: ValueReference) -> Result<bool> {
        Err(Error::UnknownVariable(vr))
    }

    /// Time until the next tick of a countdown clock.
    fn get_interval_fraction(&mut self, vr: ValueReference) -> Result<IntervalFraction> {
        Err(Error::UnknownVariable(vr))
    }

    /// Set a boolean parameter.
    fn set_boolean(&mut self, vr: ValueReference, _value: bool) -> Result<()> {
        Err(Error::UnknownVariable(vr))
    }

    /// Read a boolean parameter.
    fn get_boolean(&mut self, vr: ValueReference) -> Result<bool> {
        Err(Error::UnknownVariable(vr))
    }

    /// Set a floating point parameter.
    fn set_float64(&mut self, vr: ValueReference, _value: f64) -> Result<()> {
        Err(Error::UnknownVariable(vr))
    }
}

/// Lifecycle state of an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, not yet initialized.
    Instantiated,
    /// Parameters may be set before the model is initialized.
    InitializationMode,
    /// Clocks tick and data is exchanged; time does not advance.
    EventMode,
    /// Time advances through [`Instance::do_step`].
    StepMode,
    /// No further calls are accepted.
    Terminated,
}

impl InstanceState {
    /// Human-readable name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            InstanceState::Instantiated => "Instantiated",
            InstanceState::InitializationMode => "InitializationMode",
            InstanceState::EventMode => "EventMode",
            InstanceState::StepMode => "StepMode",
            InstanceState::Terminated => "Terminated",
        }
    }
}

/// A bus model under control of a co-simulation host.
#[derive(Debug)]
pub struct Instance<M> {
    name: String,
    model: M,
    state: InstanceState,
    time_ns: u64,
}

impl<M: BusModel> Instance<M> {
    /// Instantiate `model` under the given instance name.
    pub fn new(name: impl Into<String>, model: M) -> Self {
        Self {
            name: name.into(),
            model,
            state: InstanceState::Instantiated,
            time_ns: 0,
        }
    }

    /// The instance name used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Current simulation time in seconds.
    pub fn time(&self) -> f64 {
        ns_to_time(self.time_ns)
    }

    /// The wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The wrapped model, mutably.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Release the instance and return the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Enter initialization mode.
    pub fn enter_initialization_mode(&mut self) -> Result<()> {
        self.transition(
            "enter_initialization_mode",
            InstanceState::Instantiated,
            InstanceState::InitializationMode,
        )
    }

    /// Leave initialization mode, initializing the model, and enter event mode.
    pub fn exit_initialization_mode(&mut self) -> Result<()> {
        self.require("exit_initialization_mode", InstanceState::InitializationMode)?;
        self.call("exit_initialization_mode", |m| m.initialize())?;
        self.state = InstanceState::EventMode;
        Ok(())
    }

    /// Switch from event mode to step mode.
    pub fn enter_step_mode(&mut self) -> Result<()> {
        self.transition("enter_step_mode", InstanceState::EventMode, InstanceState::StepMode)
    }

    /// Switch from step mode to event mode.
    pub fn enter_event_mode(&mut self) -> Result<()> {
        self.transition("enter_event_mode", InstanceState::StepMode, InstanceState::EventMode)
    }

    /// Terminate the instance. Allowed in every state.
    pub fn terminate(&mut self) {
        trace!("{}: terminating", self.name);
        self.state = InstanceState::Terminated;
    }

    /// Advance time by `step_size` seconds starting at `current_time`.
    ///
    /// Returns whether the host must enter event mode before the next step.
    pub fn do_step(&mut self, current_time: f64, step_size: f64) -> Result<bool> {
        self.require("do_step", InstanceState::StepMode)?;
        let current_ns = time_to_ns(current_time);
        let target_ns = time_to_ns(current_time + step_size);
        trace!(
            "{}: step from {} ns to {} ns",
            self.name, current_ns, target_ns
        );
        let event_needed = self.call("do_step", |m| m.do_step(current_ns, target_ns))?;
        self.time_ns = target_ns;
        Ok(event_needed)
    }

    /// Evaluate discrete states.
    pub fn evaluate_discrete_states(&mut self) -> Result<()> {
        self.call("evaluate_discrete_states", |m| m.evaluate_discrete_states())
    }

    /// Update discrete states, ending the current event.
    pub fn update_discrete_states(&mut self) -> Result<()> {
        self.call("update_discrete_states", |m| m.update_discrete_states())
    }

    /// Set a binary variable.
    pub fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()> {
        self.call("set_binary", |m| m.set_binary(vr, data))
    }

    /// Get a binary variable.
    pub fn get_binary(&mut self, vr: ValueReference) -> Result<Vec<u8>> {
        self.call("get_binary", |m| m.get_binary(vr))
    }

    /// Set a clock.
    pub fn set_clock(&mut self, vr: ValueReference, active: bool) -> Result<()> {
        self.call("set_clock", |m| m.set_clock(vr, active))
    }

    /// Get a clock.
    pub fn get_clock(&mut self, vr: ValueReference) -> Result<bool> {
        self.call("get_clock", |m| m.get_clock(vr))
    }

    /// Get the interval of a countdown clock.
    pub fn get_interval_fraction(&mut self, vr: ValueReference) -> Result<IntervalFraction> {
        self.call("get_interval_fraction", |m| m.get_interval_fraction(vr))
    }

    /// Set a boolean variable.
    pub fn set_boolean(&mut self, vr: ValueReference, value: bool) -> Result<()> {
        self.call("set_boolean", |m| m.set_boolean(vr, value))
    }

    /// Get a boolean variable.
    pub fn get_boolean(&mut self, vr: ValueReference) -> Result<bool> {
        self.call("get_boolean", |m| m.get_boolean(vr))
    }

    /// Set a float variable.
    pub fn set_float64(&mut self, vr: ValueReference, value: f64) -> Result<()> {
        self.call("set_float64", |m| m.set_float64(vr, value))
    }

    fn transition(
        &mut self,
        function: &'static str,
        from: InstanceState,
        to: InstanceState,
    ) -> Result<()> {
        self.require(function, from)?;
        trace!("{}: {} -> {}", self.name, from.name(), to.name());
        self.state = to;
        Ok(())
    }

    fn require(&mut self, function: &'static str, expected: InstanceState) -> Result<()> {
        if self.state == InstanceState::Terminated {
            return Err(Error::Terminated);
        }
        if self.state != expected {
            let err = Error::InvalidState {
                function,
                expected: expected.name(),
                actual: self.state.name(),
            };
            return Err(self.fail(err));
        }
        Ok(())
    }

    fn call<R>(
        &mut self,
        function: &'static str,
        f: impl FnOnce(&mut M) -> Result<R>,
    ) -> Result<R> {
        if self.state == InstanceState::Terminated {
            return Err(Error::Terminated);
        }
        match f(&mut self.model) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("{}: {} failed: {}", self.name, function, e);
                self.state = InstanceState::Terminated;
                Err(e)
            }
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        error!("{}: {}", self.name, err);
        self.state = InstanceState::Terminated;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Echo {
        initialized: bool,
        steps: Vec<(u64, u64)>,
        data: Vec<u8>,
    }

    impl BusModel for Echo {
        fn initialize(&mut self) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn do_step(&mut self, current_ns: u64, target_ns: u64) -> Result<bool> {
            self.steps.push((current_ns, target_ns));
            Ok(false)
        }

        fn evaluate_discrete_states(&mut self) -> Result<()> {
            Ok(())
        }

        fn update_discrete_states(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()> {
            if vr != 0 {
                return Err(Error::UnknownVariable(vr));
            }
            self.data = data.to_vec();
            Ok(())
        }

        fn get_binary(&mut self, _vr: ValueReference) -> Result<Vec<u8>> {
            Ok(self.data.clone())
        }

        fn set_clock(&mut self, _vr: ValueReference, _active: bool) -> Result<()> {
            Ok(())
        }
    }

    fn stepping() -> Instance<Echo> {
        let mut instance = Instance::new("echo", Echo::default());
        instance.enter_initialization_mode().unwrap();
        instance.exit_initialization_mode().unwrap();
        instance.enter_step_mode().unwrap();
        instance
    }

    #[test]
    fn test_lifecycle() {
        let mut instance = stepping();
        assert!(instance.model().initialized);
        assert_eq!(instance.state(), InstanceState::StepMode);

        assert!(!instance.do_step(0.0, 0.001).unwrap());
        assert!(!instance.do_step(0.001, 0.001).unwrap());
        assert_eq!(
            instance.model().steps,
            vec![(0, 1_000_000), (1_000_000, 2_000_000)]
        );
        assert_eq!(instance.time(), 0.002);

        instance.enter_event_mode().unwrap();
        instance.set_binary(0, &[1, 2]).unwrap();
        assert_eq!(instance.get_binary(1).unwrap(), vec![1, 2]);
        instance.enter_step_mode().unwrap();
    }

    #[test]
    fn test_wrong_state_terminates() {
        let mut instance = Instance::new("echo", Echo::default());
        let err = instance.enter_step_mode().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                function: "enter_step_mode",
                expected: "EventMode",
                actual: "Instantiated"
            }
        ));
        assert_eq!(instance.state(), InstanceState::Terminated);
        assert!(matches!(
            instance.enter_initialization_mode(),
            Err(Error::Terminated)
        ));
    }

    #[test]
    fn test_model_error_terminates() {
        let mut instance = stepping();
        instance.enter_event_mode().unwrap();
        assert!(matches!(
            instance.set_binary(42, &[]),
            Err(Error::UnknownVariable(42))
        ));
        assert_eq!(instance.state(), InstanceState::Terminated);
        assert!(matches!(instance.get_binary(1), Err(Error::Terminated)));
    }

    #[test]
    fn test_default_methods_reject() {
        let mut instance = stepping();
        assert!(matches!(
            instance.set_float64(255, 0.5),
            Err(Error::UnknownVariable(255))
        ));
    }

    #[test]
    fn test_terminate_anywhere() {
        let mut instance = Instance::new("echo", Echo::default());
        instance.terminate();
        assert_eq!(instance.state(), InstanceState::Terminated);
    }
}
