//! PID controller with input filter (spec §4.11 — C11), grounded in
//! `original_source/lib/inc/Pid.h` (state/settings layout, fixed update
//! interval via `IntervalHelper<1000>`, `active` auto-toggling the output's
//! `settingValid`) and `PidBlock.h` (Lookup-based input/output, forced
//! update on `streamFrom`, integral reset). `Pid.cpp`/`FpFilterChain` were
//! not present in the source pack; the filter cascade and anti-windup
//! below are a standard two-stage IIR design rather than a direct port —
//! see DESIGN.md.

use crate::fixedpoint::{Derivative, Integral, Scalar};
use crate::ids::UpdateTime;
use crate::lookup::Lookup;

/// Two cascaded single-pole IIR stages, with a step-threshold bypass: a
/// jump bigger than the threshold snaps the filter straight to the new
/// value instead of smoothing into it, so the PID isn't driven off a
/// measurement lag right after a large, genuine setpoint or input step.
pub struct InputFilter {
    choice: u8,
    threshold: Scalar,
    stage1: Scalar,
    stage2: Scalar,
    initialized: bool,
}

/// `choice` indexes a shift amount: 0 is unfiltered passthrough, higher
/// indices average over more samples.
const SHIFTS: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

impl Default for InputFilter {
    fn default() -> Self {
        Self { choice: 0, threshold: Scalar::ZERO, stage1: Scalar::ZERO, stage2: Scalar::ZERO, initialized: false }
    }
}

impl InputFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_params(&mut self, choice: u8, threshold: Scalar) {
        self.choice = choice.min(SHIFTS.len() as u8 - 1);
        self.threshold = threshold;
    }

    pub fn choice(&self) -> u8 {
        self.choice
    }

    pub fn step_threshold(&self) -> Scalar {
        self.threshold
    }

    pub fn value(&self) -> Scalar {
        self.stage2
    }

    fn ewma(prev: Scalar, sample: Scalar, shift: u8) -> Scalar {
        if shift == 0 {
            return sample;
        }
        let divisor = Scalar::from_num(1u32 << shift);
        prev + (sample - prev) / divisor
    }

    /// Feed one new raw sample, return the filtered value.
    pub fn add_sample(&mut self, sample: Scalar) -> Scalar {
        if !self.initialized {
            self.stage1 = sample;
            self.stage2 = sample;
            self.initialized = true;
            return self.stage2;
        }
        let delta = if sample >= self.stage2 { sample - self.stage2 } else { self.stage2 - sample };
        if self.threshold > Scalar::ZERO && delta > self.threshold {
            self.stage1 = sample;
            self.stage2 = sample;
            return self.stage2;
        }
        let shift = SHIFTS[self.choice as usize];
        self.stage1 = Self::ewma(self.stage1, sample, shift);
        self.stage2 = Self::ewma(self.stage2, self.stage1, shift);
        self.stage2
    }
}

/// How many consecutive invalid input readings are tolerated before the
/// PID deactivates its output (spec §4.11, Open Question resolved: no
/// original source gave an exact count, so a small tolerance is chosen to
/// ignore a single dropped sensor read without masking an actual
/// disconnect).
const MAX_INPUT_FAILURES: u8 = 3;

pub struct Pid {
    input: Lookup,
    output: Lookup,
    filter: InputFilter,

    error: Scalar,
    p: Scalar,
    i: Scalar,
    d: Scalar,
    integral: Integral,
    derivative: Derivative,
    previous_filtered: Option<Scalar>,
    input_failure_count: u8,

    kp: Scalar,
    ti: u16,
    td: u16,
    enabled: bool,
    active: bool,
}

impl Pid {
    pub fn new(input: Lookup, output: Lookup) -> Self {
        Self {
            input,
            output,
            filter: InputFilter::new(),
            error: Scalar::ZERO,
            p: Scalar::ZERO,
            i: Scalar::ZERO,
            d: Scalar::ZERO,
            integral: Integral::ZERO,
            derivative: Derivative::ZERO,
            previous_filtered: None,
            input_failure_count: 0,
            kp: Scalar::ZERO,
            ti: 0,
            td: 0,
            enabled: false,
            active: false,
        }
    }

    pub fn input_id(&self) -> crate::ids::ObjectId {
        self.input.id()
    }
    pub fn set_input_id(&mut self, id: crate::ids::ObjectId) {
        self.input.set_id(id);
    }
    pub fn output_id(&self) -> crate::ids::ObjectId {
        self.output.id()
    }
    pub fn set_output_id(&mut self, id: crate::ids::ObjectId) {
        self.output.set_id(id);
    }

    /// The raw sensor value last fed through the filter, if the input was
    /// reachable and valid (spec PidBlock.h `inputValue`).
    pub fn input_value(&self) -> Option<Scalar> {
        self.input.with_process_value_in(|i| i.value().filter(|_| i.valid())).flatten()
    }

    /// The setting last written to the output, if the PID is active (spec
    /// PidBlock.h `outputValue`/`outputSetting` — this crate has no
    /// separate "achieved" output value, so setting and value coincide).
    pub fn output_value(&self) -> Option<Scalar> {
        self.active.then(|| self.output.with_process_value_out(|o| o.setting())).flatten()
    }

    pub fn error(&self) -> Scalar {
        self.error
    }
    pub fn integral(&self) -> Integral {
        self.integral
    }
    pub fn derivative(&self) -> Derivative {
        self.derivative
    }
    pub fn p(&self) -> Scalar {
        self.p
    }
    pub fn i(&self) -> Scalar {
        self.i
    }
    pub fn d(&self) -> Scalar {
        self.d
    }

    pub fn kp(&self) -> Scalar {
        self.kp
    }
    pub fn set_kp(&mut self, value: Scalar) {
        self.kp = value;
    }
    pub fn ti(&self) -> u16 {
        self.ti
    }
    pub fn set_ti(&mut self, value: u16) {
        self.ti = value;
    }
    pub fn td(&self) -> u16 {
        self.td
    }
    pub fn set_td(&mut self, value: u16) {
        self.td = value;
    }

    pub fn filter_choice(&self) -> u8 {
        self.filter.choice()
    }
    pub fn filter_threshold(&self) -> Scalar {
        self.filter.step_threshold()
    }
    pub fn configure_filter(&mut self, choice: u8, threshold: Scalar) {
        self.filter.set_params(choice, threshold);
    }

    pub fn set_integral(&mut self, value: Scalar) {
        self.integral = Integral::from_num(value);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Sets both the persisted `enabled` flag and the live `active` flag
    /// (which in turn drives the output's `settingValid`), matching
    /// `Pid::enabled(bool)` in the original.
    pub fn set_enabled(&mut self, state: bool) {
        self.set_active(state);
        self.enabled = state;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, state: bool) {
        self.output.with_process_value_out(|o| o.setting_valid(state));
        self.active = state;
    }

    /// One full PID cycle: read input, filter it, compute P/I/D, clamp and
    /// write to the output (spec §4.11).
    pub fn update(&mut self) {
        let sample = self.input.with_process_value_in(|i| (i.setting(), i.value(), i.valid()));
        let (setpoint, raw_value) = match sample {
            Some((setpoint, Some(v), true)) => (setpoint, v),
            _ => {
                self.input_failure_count = self.input_failure_count.saturating_add(1);
                if self.input_failure_count >= MAX_INPUT_FAILURES {
                    self.set_active(false);
                }
                return;
            }
        };
        self.input_failure_count = 0;

        let filtered = self.filter.add_sample(raw_value);
        self.error = setpoint - filtered;
        self.p = self.kp * self.error;

        if self.ti != 0 {
            let increment = Integral::from_num(self.error) / Integral::from_num(self.ti);
            self.integral += increment;
        } else {
            self.integral = Integral::ZERO;
        }
        self.i = self.kp * Scalar::from_num(self.integral);

        let filtered_delta = match self.previous_filtered {
            Some(prev) => filtered - prev,
            None => Scalar::ZERO,
        };
        self.previous_filtered = Some(filtered);
        if self.td != 0 {
            self.derivative = Derivative::from_num(-filtered_delta) * Derivative::from_num(self.td);
        } else {
            self.derivative = Derivative::ZERO;
        }
        self.d = self.kp * Scalar::from_num(self.derivative);

        let (min, max) = self.output.with_process_value_out(|o| (o.min(), o.max())).unwrap_or((Scalar::ZERO, Scalar::from_num(100)));
        let unclamped = self.p + self.i + self.d;
        let clamped = unclamped.clamp(min, max);

        // Anti-windup: if the output saturated, unwind the integral step
        // that pushed it past the limit rather than letting it keep
        // growing unboundedly.
        if clamped != unclamped && self.ti != 0 {
            let overshoot = unclamped - clamped;
            let correction = Integral::from_num(overshoot / self.kp_or_one());
            self.integral -= correction;
            self.i = self.kp * Scalar::from_num(self.integral);
        }

        self.set_active(self.enabled);
        if self.enabled {
            self.output.with_process_value_out(|o| o.set_setting(clamped));
        }
    }

    fn kp_or_one(&self) -> Scalar {
        if self.kp == Scalar::ZERO {
            Scalar::from_num(1)
        } else {
            self.kp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::error::CboxResult;
    use crate::ids::{InterfaceId, ObjectId, TypeId};
    use crate::object::{InterfaceRef, Object, ProcessValueIn, ProcessValueOut};
    use cbox_stream::{DataIn, DataOut};

    struct Sensor {
        setting: Scalar,
        value: Option<Scalar>,
    }
    impl ProcessValueIn for Sensor {
        fn setting(&self) -> Scalar {
            self.setting
        }
        fn value(&self) -> Option<Scalar> {
            self.value
        }
        fn valid(&self) -> bool {
            self.value.is_some()
        }
    }
    impl Object for Sensor {
        fn type_id(&self) -> TypeId {
            TypeId(10)
        }
        fn stream_from(&mut self, _i: &mut dyn DataIn) -> CboxResult<()> {
            Ok(())
        }
        fn stream_to(&self, _o: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn stream_persisted_to(&self, _o: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn update(&mut self, now: UpdateTime) -> UpdateTime {
            now + 1000
        }
        fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
            (iface == crate::iface_ids::PROCESS_VALUE_IN).then(|| InterfaceRef::ProcessValueIn(self))
        }
    }

    struct Actuator {
        setting: Scalar,
        valid: bool,
    }
    impl ProcessValueOut for Actuator {
        fn setting(&self) -> Scalar {
            self.setting
        }
        fn set_setting(&mut self, value: Scalar) {
            self.setting = value;
        }
        fn setting_valid(&mut self, valid: bool) {
            self.valid = valid;
        }
        fn min(&self) -> Scalar {
            Scalar::ZERO
        }
        fn max(&self) -> Scalar {
            Scalar::from_num(100)
        }
    }
    impl Object for Actuator {
        fn type_id(&self) -> TypeId {
            TypeId(11)
        }
        fn stream_from(&mut self, _i: &mut dyn DataIn) -> CboxResult<()> {
            Ok(())
        }
        fn stream_to(&self, _o: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn stream_persisted_to(&self, _o: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn update(&mut self, now: UpdateTime) -> UpdateTime {
            now + 1000
        }
        fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
            (iface == crate::iface_ids::PROCESS_VALUE_OUT).then(|| InterfaceRef::ProcessValueOut(self))
        }
    }

    fn setup() -> (Container, ObjectId, ObjectId) {
        let c = Container::new();
        c.add(ObjectId(100), 1, Box::new(Sensor { setting: Scalar::from_num(20), value: Some(Scalar::from_num(15)) }));
        c.add(ObjectId(101), 1, Box::new(Actuator { setting: Scalar::ZERO, valid: false }));
        (c, ObjectId(100), ObjectId(101))
    }

    #[test]
    fn positive_error_drives_positive_output_with_proportional_only() {
        let (c, in_id, out_id) = setup();
        let mut pid = Pid::new(c.lookup(in_id), c.lookup(out_id));
        pid.set_kp(Scalar::from_num(2));
        pid.set_enabled(true);
        pid.update();
        assert_eq!(pid.error(), Scalar::from_num(5)); // 20 - 15
        assert_eq!(pid.p(), Scalar::from_num(10)); // kp * error
        let out_setting = c.lookup(out_id).with_process_value_out(|o| o.setting()).unwrap();
        assert_eq!(out_setting, Scalar::from_num(10));
    }

    #[test]
    fn output_clamps_to_max() {
        let (c, in_id, out_id) = setup();
        let mut pid = Pid::new(c.lookup(in_id), c.lookup(out_id));
        pid.set_kp(Scalar::from_num(50));
        pid.set_enabled(true);
        pid.update();
        let out_setting = c.lookup(out_id).with_process_value_out(|o| o.setting()).unwrap();
        assert_eq!(out_setting, Scalar::from_num(100));
    }

    #[test]
    fn disabled_pid_does_not_write_output() {
        let (c, in_id, out_id) = setup();
        let mut pid = Pid::new(c.lookup(in_id), c.lookup(out_id));
        pid.set_kp(Scalar::from_num(2));
        pid.update(); // enabled defaults to false
        let out_setting = c.lookup(out_id).with_process_value_out(|o| o.setting()).unwrap();
        assert_eq!(out_setting, Scalar::ZERO);
        assert!(!pid.active());
    }

    #[test]
    fn invalid_input_deactivates_after_repeated_failures() {
        let c = Container::new();
        c.add(ObjectId(100), 1, Box::new(Sensor { setting: Scalar::from_num(20), value: None }));
        c.add(ObjectId(101), 1, Box::new(Actuator { setting: Scalar::ZERO, valid: false }));
        let mut pid = Pid::new(c.lookup(ObjectId(100)), c.lookup(ObjectId(101)));
        pid.set_kp(Scalar::from_num(2));
        pid.set_enabled(true);
        for _ in 0..MAX_INPUT_FAILURES {
            pid.update();
        }
        assert!(!pid.active());
    }
}
