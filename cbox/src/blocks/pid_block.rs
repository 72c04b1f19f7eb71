//! PID block, grounded on `app/brewblox/blox/PidBlock.h`: wraps
//! [`crate::control::pid::Pid`] with Lookup-resolved input/output ids and a
//! fixed 1000ms update interval, forcing an immediate recompute whenever
//! settings are written (spec scenario S4).

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object};
use cbox_stream::{DataIn, DataOut};

pub struct PidBlock {
    pid: crate::control::pid::Pid,
    next_update: UpdateTime,
}

impl PidBlock {
    pub fn construct(container: &Container) -> Box<dyn Object> {
        let pid = crate::control::pid::Pid::new(container.lookup(ObjectId::NONE), container.lookup(ObjectId::NONE));
        Box::new(Self { pid, next_update: 0 })
    }
}

impl Object for PidBlock {
    fn type_id(&self) -> TypeId {
        super::PID
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        let enabled = input.next().map_err(StatusCode::from)? != 0;
        let input_id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
        let output_id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
        let kp = get_scalar(input).map_err(StatusCode::from)?;
        let ti = input.get_u16().map_err(StatusCode::from)?;
        let td = input.get_u16().map_err(StatusCode::from)?;
        let integral_reset = get_scalar(input).map_err(StatusCode::from)?;
        let filter_choice = input.next().map_err(StatusCode::from)?;
        let filter_threshold = get_scalar(input).map_err(StatusCode::from)?;

        self.pid.set_input_id(input_id);
        self.pid.set_output_id(output_id);
        self.pid.set_kp(kp);
        self.pid.set_ti(ti);
        self.pid.set_td(td);
        self.pid.configure_filter(filter_choice, filter_threshold);
        if integral_reset != Scalar::ZERO {
            self.pid.set_integral(integral_reset);
        }
        self.pid.set_enabled(enabled);
        self.pid.update(); // bypass the update interval, as PidBlock.h does
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.pid.input_id().0).map_err(StatusCode::from)?;
        output.put_u16(self.pid.output_id().0).map_err(StatusCode::from)?;

        let input_value = self.pid.input_value();
        output.write(input_value.is_some() as u8).map_err(StatusCode::from)?;
        put_scalar(output, input_value.unwrap_or(Scalar::ZERO)).map_err(StatusCode::from)?;

        let output_value = self.pid.output_value();
        output.write(output_value.is_some() as u8).map_err(StatusCode::from)?;
        put_scalar(output, output_value.unwrap_or(Scalar::ZERO)).map_err(StatusCode::from)?;

        output.write(self.pid.enabled() as u8).map_err(StatusCode::from)?;
        output.write(self.pid.active() as u8).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.kp()).map_err(StatusCode::from)?;
        output.put_u16(self.pid.ti()).map_err(StatusCode::from)?;
        output.put_u16(self.pid.td()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.p()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.i()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.d()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.error()).map_err(StatusCode::from)?;
        output.write(self.pid.filter_choice()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.filter_threshold()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.pid.input_id().0).map_err(StatusCode::from)?;
        output.put_u16(self.pid.output_id().0).map_err(StatusCode::from)?;
        output.write(self.pid.enabled() as u8).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.kp()).map_err(StatusCode::from)?;
        output.put_u16(self.pid.ti()).map_err(StatusCode::from)?;
        output.put_u16(self.pid.td()).map_err(StatusCode::from)?;
        output.write(self.pid.filter_choice()).map_err(StatusCode::from)?;
        put_scalar(output, self.pid.filter_threshold()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        if crate::ids::is_due(now, self.next_update) {
            self.pid.update();
            self.next_update = now + 1000;
        }
        self.next_update
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else {
            None
        }
    }
}
