//! PWM actuator (spec §4.10 — C10), ported from
//! `original_source/lib/src/ActuatorPwm.cpp::slowPwmUpdate`. Drives a
//! [`crate::control::constrained::ConstrainedDigitalActuator`] target
//! (reached through a [`Lookup`]) by toggling it at the times that make its
//! measured active/inactive durations converge on the requested duty
//! cycle, correcting for constraint-induced stretching of the previous
//! cycle.
//!
//! Only the update-driven ("slow") path is implemented: the original also
//! drives a 10kHz hardware timer interrupt on embedded targets, which is
//! physical-I/O territory this crate doesn't model (it's also exactly the
//! path the original's own desktop/test build excludes).

use crate::control::digital::DigitalState;
use crate::fixedpoint::{Integral, Scalar};
use crate::ids::{ObjectId, UpdateTime};
use crate::lookup::Lookup;

fn max_duty() -> Scalar {
    Scalar::from_num(100)
}

/// `duration * fraction`, where `fraction` is typically `dutySetting / 100`
/// (i.e. in `[0, 1]`, not the `[0, 100]` percent scale `Scalar` otherwise
/// carries).
fn scale_duration(duration: u32, fraction: Scalar) -> u32 {
    (Integral::from_num(duration) * Integral::from_num(fraction))
        .round()
        .to_num::<u32>()
}

fn duty_from_ratio(high: u32, total: u32) -> Scalar {
    if total == 0 {
        return Scalar::ZERO;
    }
    Scalar::from_num(high) * Scalar::from_num(100) / Scalar::from_num(total)
}

pub struct ActuatorPwm {
    target: Lookup,
    period: u32,
    duty_setting: Scalar,
    duty_time: u32,
    duty_achieved: Scalar,
    enabled: bool,
    setting_valid: bool,
    value_valid: bool,
    last_update_time: UpdateTime,
    /// `Balanced` constraint (spec §4.9 table, order 5): when set, the
    /// actuator registers its requested duty with the shared balancer every
    /// tick and drives at most `min(setting, granted)` instead, per
    /// `ActuatorAnalogConstrained`'s wrapping of `ActuatorPwm` in the
    /// original firmware.
    balanced: Option<(Lookup, ObjectId)>,
}

impl ActuatorPwm {
    pub fn new(target: Lookup, period: u32) -> Self {
        let mut pwm = Self {
            target,
            period: 1000,
            duty_setting: Scalar::ZERO,
            duty_time: 0,
            duty_achieved: Scalar::ZERO,
            enabled: true,
            setting_valid: false,
            value_valid: false,
            last_update_time: 0,
            balanced: None,
        };
        pwm.set_period(period);
        pwm
    }

    /// Arbitrate this actuator's duty through `balancer` under `client`'s
    /// id (spec §4.9 table — `Balanced`). Pass `None` to stop arbitrating.
    pub fn set_balanced(&mut self, balanced: Option<(Lookup, ObjectId)>) {
        self.balanced = balanced;
    }

    fn duty_time_for(&self, value: Scalar) -> u32 {
        if value <= Scalar::ZERO {
            0
        } else if value >= max_duty() {
            self.period
        } else {
            scale_duration(self.period, value / max_duty())
        }
    }

    /// Registers this tick's requested duty with the balancer (if any) and
    /// replaces `duty_time` with the one computed from `min(setting,
    /// granted)`, per spec §4.12.
    fn apply_balanced(&mut self) {
        let Some((balancer, client)) = &self.balanced else { return };
        let requested: u8 = if self.setting_valid {
            self.duty_setting.round().to_num::<i32>().clamp(0, 100) as u8
        } else {
            0
        };
        let granted = balancer.with_balancer(|b| b.request(*client, requested)).unwrap_or(requested);
        let effective = self.duty_setting.min(Scalar::from_num(granted));
        self.duty_time = self.duty_time_for(effective);
    }

    fn target_supports_fast_io(&self) -> bool {
        self.target.with_digital_actuator(|a| a.supports_fast_io()).unwrap_or(false)
    }

    /// Periods under 1000ms need hardware timer support from the target to
    /// be meaningful; without it they're clamped up to 1000ms (spec
    /// §4.10).
    pub fn set_period(&mut self, period: u32) {
        self.period = if period < 1000 && !self.target_supports_fast_io() { 1000 } else { period };
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn setting(&self) -> Scalar {
        self.duty_setting
    }

    pub fn set_setting(&mut self, value: Scalar) {
        self.duty_setting = value.clamp(Scalar::ZERO, max_duty());
        self.duty_time = self.duty_time_for(self.duty_setting);
        self.set_setting_valid(true);
    }

    pub fn value(&self) -> Scalar {
        self.duty_achieved
    }

    pub fn value_valid(&self) -> bool {
        self.value_valid
    }

    pub fn setting_valid(&self) -> bool {
        self.setting_valid
    }

    pub fn set_setting_valid(&mut self, valid: bool) {
        if !valid && self.enabled {
            self.target.with_digital_actuator(|a| a.desired_state(DigitalState::Inactive, self.last_update_time));
        }
        self.setting_valid = valid;
    }

    fn duty_fraction(&self) -> Scalar {
        self.duty_setting / max_duty()
    }

    pub fn update(&mut self, now: UpdateTime) -> UpdateTime {
        self.last_update_time = now;
        self.apply_balanced();
        self.slow_pwm_update(now)
    }

    fn slow_pwm_update(&mut self, now: UpdateTime) -> UpdateTime {
        let durations = match self.target.with_digital_actuator(|a| a.active_durations(now)) {
            Some(d) => d,
            None => return now + 1000,
        };

        let mut current_high_time = durations.current_active;
        let mut previous_high_time = durations.previous_active;
        let mut previous_period = durations.previous_period;
        let mut current_period = durations.current_period;
        let mut last_state = durations.last_state;
        let inv_duty_time = self.period.saturating_sub(self.duty_time);

        let mut wait: u32 = 0;

        // Scenario 1: clamp the fixed part of the current period to at
        // most half of `period`. If it's longer, fold the excess into the
        // previous period so the remembered history stays bounded.
        if current_period > 2 * self.period {
            let limit = self.period >> 1;
            if self.duty_setting <= max_duty() / Scalar::from_num(2) {
                if current_high_time > limit {
                    let excess = current_high_time - limit;
                    if excess > previous_period {
                        previous_high_time = previous_period;
                    } else if excess >= previous_high_time {
                        previous_high_time = excess;
                    }
                    let current_low_time = current_period - current_high_time;
                    current_high_time = limit;
                    current_period = current_low_time + limit;
                }
            } else {
                let current_low_time = current_period - current_high_time;
                if current_low_time > limit {
                    let excess = current_low_time - limit;
                    if excess > previous_period {
                        previous_high_time = 0;
                    } else if excess < previous_high_time {
                        previous_high_time = previous_period - excess;
                    }
                    current_period = current_high_time + limit;
                }
            }
        }

        // Scenario 2: both periods combined longer than 2.5 periods.
        // Compress the previous period's oldest-history tail.
        if previous_period + current_period > 2 * self.period + (self.period >> 1) {
            let max_period = current_period.max(self.period);
            if previous_period > max_period {
                match last_state {
                    DigitalState::Active => {
                        let max_low_time = 3 * (max_period - current_high_time);
                        let previous_low_time = previous_period - previous_high_time;
                        if previous_low_time > max_low_time {
                            previous_period = previous_high_time + max_low_time;
                        }
                    }
                    DigitalState::Inactive => {
                        let max_high_time = 3 * current_high_time.max(self.duty_time);
                        if previous_high_time > max_high_time {
                            let previous_low_time = previous_period - previous_high_time;
                            previous_high_time = max_high_time;
                            previous_period = previous_high_time + previous_low_time;
                        }
                    }
                    DigitalState::Unknown => {}
                }
            }
        }

        if previous_period < self.period {
            // history is shorter than one period: pad it back out with
            // whichever state brings achieved duty closer to the setting.
            let shortened_by = self.period - previous_period;
            previous_period = self.period;
            if previous_high_time < self.duty_time {
                previous_high_time = (previous_high_time + shortened_by).min(self.duty_time);
            }
        }

        let two_period_elapsed = previous_period + current_period;
        let mut two_period_high_time = previous_high_time + current_high_time;

        match last_state {
            DigitalState::Active => {
                if self.duty_setting == max_duty() {
                    let act_wait = self.target.with_digital_actuator(|a| a.desired_state(DigitalState::Active, now)).unwrap_or(0);
                    wait = if current_period + 1000 <= self.period { self.period - current_period } else { 1000 };
                    wait = wait.max(act_wait);
                } else if self.duty_setting <= max_duty() / Scalar::from_num(2) {
                    if current_high_time < self.duty_time {
                        wait = self.duty_time - current_high_time;
                    }
                } else {
                    let min_high_time = self.duty_time - (self.duty_time >> 2);
                    if current_high_time < min_high_time {
                        wait = min_high_time - current_high_time;
                    } else {
                        let mut max_high_time = self.duty_time.max(durations.previous_active).max((3 * self.duty_time) >> 2);
                        if durations.previous_period >= self.period {
                            max_high_time += max_high_time / 2;
                        }
                        if current_high_time < max_high_time {
                            let mut two_period_target_high_time = scale_duration(two_period_elapsed, self.duty_fraction());
                            let mean = self.duty_time.max(two_period_target_high_time / 2);
                            if current_high_time > mean && previous_high_time < mean {
                                two_period_target_high_time -= (current_high_time - previous_high_time) / 4;
                            }
                            if two_period_high_time < two_period_target_high_time {
                                wait = (two_period_target_high_time - two_period_high_time).min(max_high_time - current_high_time);
                            }
                        }
                    }
                }
            }
            DigitalState::Inactive => {
                let current_low_time = current_period - current_high_time;
                if self.duty_setting == Scalar::ZERO {
                    let act_wait = self.target.with_digital_actuator(|a| a.desired_state(DigitalState::Inactive, now)).unwrap_or(0);
                    wait = if current_period + 1000 <= self.period { self.period - current_period } else { 1000 };
                    wait = wait.max(act_wait);
                } else if self.duty_setting > max_duty() / Scalar::from_num(2) {
                    if current_low_time < inv_duty_time {
                        wait = inv_duty_time - current_low_time;
                    }
                } else {
                    let min_low_time = inv_duty_time - (inv_duty_time >> 2);
                    if current_low_time < min_low_time {
                        wait = min_low_time - current_low_time;
                    } else {
                        let mut max_low_time = inv_duty_time
                            .max(durations.previous_period - durations.previous_active)
                            .max((3 * inv_duty_time) >> 2);
                        if durations.previous_period >= self.period {
                            max_low_time += max_low_time / 2;
                        }
                        if current_low_time < max_low_time {
                            let inv_fraction = Scalar::from_num(1) - self.duty_fraction();
                            let mut two_period_target_low_time = scale_duration(two_period_elapsed, inv_fraction);
                            let previous_low_time = previous_period - previous_high_time;
                            let mean = inv_duty_time.max(two_period_target_low_time / 2);
                            if current_low_time > mean && previous_low_time < mean {
                                two_period_target_low_time -= (current_low_time - previous_low_time) / 4;
                            }
                            let two_period_low_time = two_period_elapsed - two_period_high_time;
                            if two_period_low_time < two_period_target_low_time {
                                wait = (two_period_target_low_time - two_period_low_time).min(max_low_time - current_low_time);
                            }
                        }
                    }
                }
            }
            DigitalState::Unknown => {}
        }

        if self.enabled && self.setting_valid && wait == 0 {
            let next_state = if last_state == DigitalState::Inactive { DigitalState::Active } else { DigitalState::Inactive };
            wait = self.target.with_digital_actuator(|a| a.desired_state(next_state, now)).unwrap_or(0);
            last_state = self.target.with_digital_actuator(|a| a.state()).unwrap_or(last_state);
        }

        let two_period_total = two_period_elapsed + wait;
        if last_state == DigitalState::Active {
            two_period_high_time += wait;
        }

        let duty_achieved = duty_from_ratio(two_period_high_time, two_period_total);
        self.value_valid = true;
        match last_state {
            DigitalState::Active => {
                if duty_achieved >= self.duty_achieved {
                    self.duty_achieved = duty_achieved;
                }
            }
            DigitalState::Inactive => {
                if duty_achieved <= self.duty_achieved {
                    self.duty_achieved = duty_achieved;
                }
            }
            DigitalState::Unknown => {
                self.value_valid = false;
                self.duty_achieved = self.duty_setting;
            }
        }

        now + 1000.min((wait >> 1) + 1)
    }
}

impl crate::object::ProcessValueOut for ActuatorPwm {
    fn setting(&self) -> Scalar {
        ActuatorPwm::setting(self)
    }
    fn set_setting(&mut self, value: Scalar) {
        ActuatorPwm::set_setting(self, value)
    }
    fn setting_valid(&mut self, valid: bool) {
        ActuatorPwm::set_setting_valid(self, valid)
    }
    fn min(&self) -> Scalar {
        Scalar::ZERO
    }
    fn max(&self) -> Scalar {
        max_duty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::control::constrained::ConstrainedDigitalActuator;
    use crate::control::digital::{ChangeLoggedActuator, MockChannel};
    use crate::ids::ObjectId;

    fn target_container() -> (Container, ObjectId) {
        struct Block(ConstrainedDigitalActuator<MockChannel>);
        impl crate::object::Object for Block {
            fn type_id(&self) -> crate::ids::TypeId {
                crate::ids::TypeId(55)
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
                self.0.update(now)
            }
            fn implements(&mut self, iface: crate::ids::InterfaceId) -> Option<crate::object::InterfaceRef<'_>> {
                if iface == crate::iface_ids::DIGITAL_ACTUATOR {
                    Some(crate::object::InterfaceRef::DigitalActuator(&mut self.0))
                } else {
                    None
                }
            }
        }
        let c = Container::new();
        let actuator = ConstrainedDigitalActuator::new(ChangeLoggedActuator::new(MockChannel::default(), false, 16));
        c.add(ObjectId(100), 1, Box::new(Block(actuator)));
        (c, ObjectId(100))
    }

    #[test]
    fn full_duty_keeps_actuator_active() {
        let (c, id) = target_container();
        let mut pwm = ActuatorPwm::new(c.lookup(id), 4000);
        pwm.set_setting(Scalar::from_num(100));
        let mut now = 0;
        for _ in 0..10 {
            let next = pwm.update(now);
            now = next;
        }
        let state = c.lookup(id).with_digital_actuator(|a| a.state()).unwrap();
        assert_eq!(state, DigitalState::Active);
        assert!(pwm.value() >= Scalar::from_num(90));
    }

    #[test]
    fn zero_duty_keeps_actuator_inactive() {
        let (c, id) = target_container();
        let mut pwm = ActuatorPwm::new(c.lookup(id), 4000);
        pwm.set_setting(Scalar::ZERO);
        let mut now = 0;
        for _ in 0..10 {
            now = pwm.update(now);
        }
        let state = c.lookup(id).with_digital_actuator(|a| a.state()).unwrap();
        assert_eq!(state, DigitalState::Inactive);
    }

    #[test]
    fn period_below_1000ms_is_clamped_without_fast_io_support() {
        let (c, id) = target_container();
        let pwm = ActuatorPwm::new(c.lookup(id), 200);
        assert_eq!(pwm.period(), 1000);
    }

    #[test]
    fn fifty_percent_duty_converges_to_roughly_half_period_high_time() {
        let (c, id) = target_container();
        let mut pwm = ActuatorPwm::new(c.lookup(id), 2000);
        pwm.set_setting(Scalar::from_num(50));
        let mut now: u32 = 0;
        for _ in 0..40 {
            now = pwm.update(now);
        }
        let achieved: i32 = pwm.value().round().to_num();
        assert!((40..=60).contains(&achieved), "achieved duty {} not close to 50", achieved);
    }

    #[test]
    fn balanced_actuator_is_clamped_to_its_grant() {
        use crate::control::balancer::Balancer;

        let (c, id) = target_container();
        let mut pwm = ActuatorPwm::new(c.lookup(id), 2000);
        pwm.set_setting(Scalar::from_num(80));

        struct BalancerBlock(Balancer);
        impl crate::object::Object for BalancerBlock {
            fn type_id(&self) -> crate::ids::TypeId {
                crate::ids::TypeId(56)
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
                if iface == crate::iface_ids::BALANCER {
                    Some(crate::object::InterfaceRef::Balancer(&mut self.0))
                } else {
                    None
                }
            }
        }
        c.add(ObjectId(200), 1, Box::new(BalancerBlock(Balancer::new())));
        // A rival client eats 60 of the shared 100, leaving this client at most 40.
        c.lookup(ObjectId(200)).with_balancer(|b| b.request(ObjectId(999), 60));

        pwm.set_balanced(Some((c.lookup(ObjectId(200)), id)));
        let mut now: u32 = 0;
        for _ in 0..20 {
            now = pwm.update(now);
        }
        let achieved: i32 = pwm.value().round().to_num();
        assert!(achieved <= 40, "balanced duty {} exceeds its grant", achieved);
    }

    #[test]
    fn achieved_value_is_monotone_within_each_state() {
        let (c, id) = target_container();
        let mut pwm = ActuatorPwm::new(c.lookup(id), 2000);
        pwm.set_setting(Scalar::from_num(50));
        let mut now: u32 = 0;
        let mut last_value = pwm.value();
        let mut last_state = DigitalState::Unknown;
        for _ in 0..60 {
            now = pwm.update(now);
            let state = c.lookup(id).with_digital_actuator(|a| a.state()).unwrap();
            let value = pwm.value();
            if state == last_state {
                match state {
                    DigitalState::Active => assert!(value >= last_value, "achieved value dropped while active: {} -> {}", last_value, value),
                    DigitalState::Inactive => assert!(value <= last_value, "achieved value rose while inactive: {} -> {}", last_value, value),
                    DigitalState::Unknown => {}
                }
            }
            last_value = value;
            last_state = state;
        }
    }

    #[test]
    fn duty_converges_under_min_on_and_min_off_constraints() {
        use crate::control::constrained::{MinOffTime, MinOnTime};

        struct Block(ConstrainedDigitalActuator<MockChannel>);
        impl crate::object::Object for Block {
            fn type_id(&self) -> crate::ids::TypeId {
                crate::ids::TypeId(55)
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
                self.0.update(now)
            }
            fn implements(&mut self, iface: crate::ids::InterfaceId) -> Option<crate::object::InterfaceRef<'_>> {
                if iface == crate::iface_ids::DIGITAL_ACTUATOR {
                    Some(crate::object::InterfaceRef::DigitalActuator(&mut self.0))
                } else {
                    None
                }
            }
        }
        let c = Container::new();
        let mut actuator = ConstrainedDigitalActuator::new(ChangeLoggedActuator::new(MockChannel::default(), false, 16));
        actuator.add_constraint(Box::new(MinOnTime { limit: 500 }));
        actuator.add_constraint(Box::new(MinOffTime { limit: 500 }));
        c.add(ObjectId(100), 1, Box::new(Block(actuator)));
        let id = ObjectId(100);

        // A 10000ms period is generous enough that 500ms min-on/min-off
        // floors don't dominate the cycle, so 50% duty should still be
        // reachable despite both constraints being active.
        let mut pwm = ActuatorPwm::new(c.lookup(id), 10000);
        pwm.set_setting(Scalar::from_num(50));
        let mut now: u32 = 0;
        for _ in 0..80 {
            now = pwm.update(now);
        }
        let achieved: i32 = pwm.value().round().to_num();
        assert!((35..=65).contains(&achieved), "achieved duty {} under min-on/min-off constraints not close to 50", achieved);
    }
}
