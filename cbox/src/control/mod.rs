//! The control core (spec §3.4-§3.7, C8-C12): digital actuators, the
//! constraint layer, PWM, PID and the balancer.

pub mod balancer;
pub mod constrained;
pub mod digital;
pub mod pid;
pub mod pwm;
