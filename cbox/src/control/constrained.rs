//! Constrained digital actuator (spec §4.9 — C9), ported from
//! `original_source/lib/inc/ActuatorDigitalConstrained.h`. A fixed,
//! ascending-order list of constraints gates every state-change request;
//! the first constraint to block the request wins, sets its bit in
//! `limiting`, and the check stops there — later constraints in the list
//! simply aren't consulted that tick.

use crate::control::digital::{ActiveDurations, ChangeLoggedActuator, DigitalChannel, DigitalState};
use crate::ids::{ObjectId, UpdateTime};
use crate::lookup::Lookup;

/// Whether a state-change request is allowed right now, and if not, how
/// long the caller should wait before asking again (time-based
/// constraints only; mutex/balanced blocks report `None`).
pub enum Allowance {
    Allowed,
    Blocked { retry_after: Option<u32> },
}

/// One gate in the ordered constraint chain. `order()` fixes position in
/// the chain (ties broken by insertion order); lower runs first.
pub trait Constraint<C: DigitalChannel> {
    fn order(&self) -> u8;
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, act: &ChangeLoggedActuator<C>) -> Allowance;
}

/// Minimum time a transition to `Inactive` must be held before flipping
/// back to `Active` (order 0 — runs first, spec §4.9 table).
pub struct MinOffTime {
    pub limit: u32,
}
impl<C: DigitalChannel> Constraint<C> for MinOffTime {
    fn order(&self) -> u8 {
        0
    }
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, act: &ChangeLoggedActuator<C>) -> Allowance {
        if new_state != DigitalState::Active {
            return Allowance::Allowed;
        }
        if act.state() != DigitalState::Inactive {
            return Allowance::Allowed;
        }
        let (start, _end) = act.get_last_start_end_time(DigitalState::Inactive, now);
        let held = now.wrapping_sub(start);
        if held >= self.limit {
            Allowance::Allowed
        } else {
            Allowance::Blocked { retry_after: Some(self.limit - held) }
        }
    }
}

/// Minimum time a transition to `Active` must be held before flipping
/// back to `Inactive` (order 1).
pub struct MinOnTime {
    pub limit: u32,
}
impl<C: DigitalChannel> Constraint<C> for MinOnTime {
    fn order(&self) -> u8 {
        1
    }
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, act: &ChangeLoggedActuator<C>) -> Allowance {
        if new_state != DigitalState::Inactive || act.state() != DigitalState::Active {
            return Allowance::Allowed;
        }
        let (start, _end) = act.get_last_start_end_time(DigitalState::Active, now);
        let held = now.wrapping_sub(start);
        if held >= self.limit {
            Allowance::Allowed
        } else {
            Allowance::Blocked { retry_after: Some(self.limit - held) }
        }
    }
}

/// Serializes access to a shared resource (e.g. two heating elements that
/// must never be on together) against a sibling actuator reached through a
/// [`Lookup`] to its `MutexTargetIface` (order 2).
pub struct Mutex {
    pub self_id: ObjectId,
    pub target: Lookup,
    pub hold_after_off: u32,
    pub fair: bool,
    holding: bool,
}
impl Mutex {
    pub fn new(self_id: ObjectId, target: Lookup, hold_after_off: u32, fair: bool) -> Self {
        Self { self_id, target, hold_after_off, fair, holding: false }
    }
}
impl<C: DigitalChannel> Constraint<C> for Mutex {
    fn order(&self) -> u8 {
        2
    }
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, act: &ChangeLoggedActuator<C>) -> Allowance {
        match new_state {
            DigitalState::Active => {
                if self.holding {
                    return Allowance::Allowed;
                }
                let acquired = self
                    .target
                    .with_mutex_target(|t| t.try_acquire(self.self_id, self.fair))
                    .unwrap_or(true); // no target configured: nothing to serialize against
                if acquired {
                    self.holding = true;
                    Allowance::Allowed
                } else {
                    Allowance::Blocked { retry_after: None }
                }
            }
            _ => {
                if self.holding {
                    let (inactive_since, _) = act.get_last_start_end_time(DigitalState::Inactive, now);
                    let released = self
                        .target
                        .with_mutex_target(|t| t.release_if_cooled_down(self.self_id, now, self.hold_after_off, inactive_since))
                        .unwrap_or(true);
                    if released {
                        self.holding = false;
                    }
                }
                Allowance::Allowed
            }
        }
    }
}

/// Delays turning on until the request has been continuously made for
/// `delay` ms (order 3).
pub struct DelayedOn {
    pub delay: u32,
    since: Option<UpdateTime>,
}
impl DelayedOn {
    pub fn new(delay: u32) -> Self {
        Self { delay, since: None }
    }
}
impl<C: DigitalChannel> Constraint<C> for DelayedOn {
    fn order(&self) -> u8 {
        3
    }
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, _act: &ChangeLoggedActuator<C>) -> Allowance {
        if new_state != DigitalState::Active {
            self.since = None;
            return Allowance::Allowed;
        }
        let since = *self.since.get_or_insert(now);
        let waited = now.wrapping_sub(since);
        if waited >= self.delay {
            Allowance::Allowed
        } else {
            Allowance::Blocked { retry_after: Some(self.delay - waited) }
        }
    }
}

/// Delays turning off until the request has been continuously made for
/// `delay` ms (order 4).
pub struct DelayedOff {
    pub delay: u32,
    since: Option<UpdateTime>,
}
impl DelayedOff {
    pub fn new(delay: u32) -> Self {
        Self { delay, since: None }
    }
}
impl<C: DigitalChannel> Constraint<C> for DelayedOff {
    fn order(&self) -> u8 {
        4
    }
    fn check(&mut self, new_state: DigitalState, now: UpdateTime, _act: &ChangeLoggedActuator<C>) -> Allowance {
        if new_state != DigitalState::Inactive {
            self.since = None;
            return Allowance::Allowed;
        }
        let since = *self.since.get_or_insert(now);
        let waited = now.wrapping_sub(since);
        if waited >= self.delay {
            Allowance::Allowed
        } else {
            Allowance::Blocked { retry_after: Some(self.delay - waited) }
        }
    }
}

/// The ordered gate, plus the recorded digital history it gates (spec
/// §4.9). The generic channel type flows through from [`ChangeLoggedActuator`].
pub struct ConstrainedDigitalActuator<C: DigitalChannel> {
    inner: ChangeLoggedActuator<C>,
    constraints: Vec<Box<dyn Constraint<C>>>,
    limiting: u8,
    desired: DigitalState,
}

impl<C: DigitalChannel> ConstrainedDigitalActuator<C> {
    pub fn new(inner: ChangeLoggedActuator<C>) -> Self {
        Self { inner, constraints: Vec::new(), limiting: 0, desired: DigitalState::Unknown }
    }

    /// Inserted in ascending `order()`; constraints with equal order keep
    /// their relative insertion order (`sort_by_key` is stable).
    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint<C>>) {
        self.constraints.push(constraint);
        self.constraints.sort_by_key(|c| c.order());
    }

    pub fn remove_all_constraints(&mut self) {
        self.constraints.clear();
        self.limiting = 0;
    }

    pub fn limiting(&self) -> u8 {
        self.limiting
    }

    pub fn state(&self) -> DigitalState {
        self.inner.state()
    }

    /// Request `state`. Returns the applied state's wait: `0` if applied
    /// now, otherwise the shortest suggested retry delay reported by the
    /// constraint that blocked it (spec §4.9).
    pub fn desired_state(&mut self, state: DigitalState, now: UpdateTime) -> UpdateTime {
        self.desired = state;
        let mut limiting = 0u8;
        for (index, constraint) in self.constraints.iter_mut().enumerate() {
            match constraint.check(state, now, &self.inner) {
                Allowance::Allowed => continue,
                Allowance::Blocked { retry_after } => {
                    limiting = 1u8.checked_shl(index as u32).unwrap_or(0);
                    self.limiting = limiting;
                    self.inner.state_logged(self.inner.state(), now);
                    return retry_after.unwrap_or(1);
                }
            }
        }
        self.limiting = 0;
        self.inner.state_logged(state, now);
        0
    }

    /// Re-applies the last requested state at the new time, as the
    /// scheduler's periodic update does (spec §4.9).
    pub fn update(&mut self, now: UpdateTime) -> UpdateTime {
        self.desired_state(self.desired, now)
    }

    pub fn active_durations(&self, now: UpdateTime) -> ActiveDurations {
        self.inner.active_durations(now)
    }

    pub fn get_last_start_end_time(&self, state: DigitalState, now: UpdateTime) -> (UpdateTime, UpdateTime) {
        self.inner.get_last_start_end_time(state, now)
    }

    pub fn supports_fast_io(&self) -> bool {
        self.inner.supports_fast_io()
    }

    pub fn set_state_unlogged(&mut self, state: DigitalState) {
        self.inner.set_state_unlogged(state);
    }

    pub fn reset_history(&mut self) {
        self.inner.reset_history();
    }
}

impl<C: DigitalChannel> crate::object::DigitalActuatorIface for ConstrainedDigitalActuator<C> {
    fn state(&self) -> DigitalState {
        ConstrainedDigitalActuator::state(self)
    }
    fn desired_state(&mut self, state: DigitalState, now: UpdateTime) -> UpdateTime {
        ConstrainedDigitalActuator::desired_state(self, state, now)
    }
    fn active_durations(&self, now: UpdateTime) -> ActiveDurations {
        ConstrainedDigitalActuator::active_durations(self, now)
    }
    fn supports_fast_io(&self) -> bool {
        ConstrainedDigitalActuator::supports_fast_io(self)
    }
    fn set_state_unlogged(&mut self, state: DigitalState) {
        ConstrainedDigitalActuator::set_state_unlogged(self, state)
    }
    fn limiting(&self) -> u8 {
        ConstrainedDigitalActuator::limiting(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::control::digital::MockChannel;

    fn actuator() -> ConstrainedDigitalActuator<MockChannel> {
        ConstrainedDigitalActuator::new(ChangeLoggedActuator::new(MockChannel::default(), false, 8))
    }

    #[test]
    fn min_off_time_blocks_immediate_restart() {
        let mut act = actuator();
        act.add_constraint(Box::new(MinOffTime { limit: 1000 }));
        act.desired_state(DigitalState::Active, 0);
        act.desired_state(DigitalState::Inactive, 100);
        let wait = act.desired_state(DigitalState::Active, 200);
        assert_eq!(act.state(), DigitalState::Inactive);
        assert_eq!(wait, 900);
        assert_eq!(act.limiting(), 0x01);
    }

    #[test]
    fn min_off_time_allows_after_held_long_enough() {
        let mut act = actuator();
        act.add_constraint(Box::new(MinOffTime { limit: 1000 }));
        act.desired_state(DigitalState::Active, 0);
        act.desired_state(DigitalState::Inactive, 100);
        let wait = act.desired_state(DigitalState::Active, 1200);
        assert_eq!(act.state(), DigitalState::Active);
        assert_eq!(wait, 0);
    }

    #[test]
    fn min_on_time_blocks_immediate_shutoff() {
        let mut act = actuator();
        act.add_constraint(Box::new(MinOnTime { limit: 500 }));
        act.desired_state(DigitalState::Active, 0);
        let wait = act.desired_state(DigitalState::Inactive, 100);
        assert_eq!(act.state(), DigitalState::Active);
        assert_eq!(wait, 400);
    }

    #[test]
    fn constraints_run_in_declared_order_regardless_of_insertion_order() {
        let mut act = actuator();
        act.add_constraint(Box::new(MinOnTime { limit: 500 }));
        act.add_constraint(Box::new(MinOffTime { limit: 1000 }));
        // MinOffTime (order 0) must end up before MinOnTime (order 1).
        assert_eq!(act.constraints[0].order(), 0);
        assert_eq!(act.constraints[1].order(), 1);
    }

    #[test]
    fn delayed_on_requires_continuous_request() {
        let mut act = actuator();
        act.add_constraint(Box::new(DelayedOn::new(300)));
        let wait = act.desired_state(DigitalState::Active, 0);
        assert_eq!(act.state(), DigitalState::Inactive);
        assert_eq!(wait, 300);
        let wait = act.desired_state(DigitalState::Active, 300);
        assert_eq!(act.state(), DigitalState::Active);
        assert_eq!(wait, 0);
    }

    #[test]
    fn mutex_blocks_second_actuator_while_first_holds() {
        let container = Container::new();
        struct Target(bool);
        impl crate::object::MutexTargetIface for Target {
            fn try_acquire(&mut self, _requester: ObjectId, _fair: bool) -> bool {
                if self.0 {
                    false
                } else {
                    self.0 = true;
                    true
                }
            }
            fn release_if_cooled_down(&mut self, _requester: ObjectId, _now: UpdateTime, _hold_after_off: u32, _inactive_since: UpdateTime) -> bool {
                self.0 = false;
                true
            }
        }
        struct Holder(Target);
        impl crate::object::Object for Holder {
            fn type_id(&self) -> crate::ids::TypeId {
                crate::ids::TypeId(1)
            }
            fn stream_from(&mut self, _i: &mut dyn cbox_stream::DataIn) -> crate::error::CboxResult<()> {
                Ok(())
            }
            fn stream_to(&self, _o: &mut dyn cbox_stream::DataOut) -> crate::error::CboxResult<()> {
                Ok(())
            }
            fn stream_persisted_to(&self, _o: &mut dyn cbox_stream::DataOut) -> crate::error::CboxResult<()> {
                Ok(())
            }
            fn update(&mut self, now: UpdateTime) -> UpdateTime {
                now + 1000
            }
            fn implements(&mut self, iface: crate::ids::InterfaceId) -> Option<crate::object::InterfaceRef<'_>> {
                if iface == crate::iface_ids::MUTEX_TARGET {
                    Some(crate::object::InterfaceRef::MutexTarget(&mut self.0))
                } else {
                    None
                }
            }
        }
        container.add(ObjectId(100), 1, Box::new(Holder(Target(false))));
        let lookup = container.lookup(ObjectId(100));

        let mut a = actuator();
        a.add_constraint(Box::new(Mutex::new(ObjectId(101), lookup.clone(), 0, false)));
        let mut b = actuator();
        b.add_constraint(Box::new(Mutex::new(ObjectId(102), lookup, 0, false)));

        assert_eq!(a.desired_state(DigitalState::Active, 0), 0);
        assert_eq!(a.state(), DigitalState::Active);
        // second actuator must be refused the mutex while the first holds it
        assert!(matches!(b.desired_state(DigitalState::Active, 0), 1));
        assert_eq!(b.state(), DigitalState::Inactive);
    }
}
