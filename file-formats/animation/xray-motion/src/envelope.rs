//! Curve keys and envelope evaluation
//!
//! Editor motions store each animated channel as an envelope: an ordered list
//! of keys plus two behaviors that extrapolate the curve before the first and
//! after the last key. The interpolation math is the LightWave envelope model
//! used by the engine's editor.

use std::ops::RangeInclusive;

use xray_data::{PackedReader, PackedWriter};

use crate::error::{MotionError, Result};

/// Quantization range of key parameters on disk
const PARAM_RANGE: (f32, f32) = (-32.0, 32.0);

/// Convergence tolerance of the 2D Bezier time solver
const BEZIER_TOLERANCE: f32 = 1e-4;

/// Iteration cap of the 2D Bezier time solver
const BEZIER_MAX_ITERATIONS: usize = 64;

/// Tangent and shape parameters of a curve key
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyParams {
    pub tension: f32,
    pub continuity: f32,
    pub bias: f32,
    /// Hermite/Bezier tangents: `[in, out, ...]`; 2D Bezier handles use all four
    pub params: [f32; 4],
}

/// Interpolation kind of the segment ending at a key
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    Tcb(KeyParams),
    Hermite(KeyParams),
    Bezier1D(KeyParams),
    Linear(KeyParams),
    Stepped,
    Bezier2D(KeyParams),
}

impl Shape {
    /// On-disk shape code
    pub const fn code(&self) -> u8 {
        match self {
            Self::Tcb(_) => 0,
            Self::Hermite(_) => 1,
            Self::Bezier1D(_) => 2,
            Self::Linear(_) => 3,
            Self::Stepped => 4,
            Self::Bezier2D(_) => 5,
        }
    }

    /// Build a shape from its code; `params` is ignored for stepped keys
    pub fn from_code(code: u8, params: KeyParams) -> Result<Self> {
        Ok(match code {
            0 => Self::Tcb(params),
            1 => Self::Hermite(params),
            2 => Self::Bezier1D(params),
            3 => Self::Linear(params),
            4 => Self::Stepped,
            5 => Self::Bezier2D(params),
            other => return Err(MotionError::format(format!("unknown key shape {other}"))),
        })
    }

    /// Parameters of the key, zero for stepped keys
    pub fn params(&self) -> KeyParams {
        match *self {
            Self::Tcb(p)
            | Self::Hermite(p)
            | Self::Bezier1D(p)
            | Self::Linear(p)
            | Self::Bezier2D(p) => p,
            Self::Stepped => KeyParams::default(),
        }
    }
}

/// One curve key
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Key {
    /// Time in seconds
    pub time: f32,
    pub value: f32,
    pub shape: Shape,
}

impl Key {
    pub fn new(time: f32, value: f32, shape: Shape) -> Self {
        Self { time, value, shape }
    }

    /// A linear key with zero parameters
    pub fn linear(time: f32, value: f32) -> Self {
        Self::new(time, value, Shape::Linear(KeyParams::default()))
    }

    pub(crate) fn read(reader: &mut PackedReader<'_>) -> Result<Self> {
        let value = reader.f32()?;
        let time = reader.f32()?;
        let code = reader.u8()?;
        let params = if code == Shape::Stepped.code() {
            KeyParams::default()
        } else {
            let (min, max) = PARAM_RANGE;
            KeyParams {
                tension: reader.q16f(min, max)?,
                continuity: reader.q16f(min, max)?,
                bias: reader.q16f(min, max)?,
                params: [
                    reader.q16f(min, max)?,
                    reader.q16f(min, max)?,
                    reader.q16f(min, max)?,
                    reader.q16f(min, max)?,
                ],
            }
        };
        Ok(Self {
            time,
            value,
            shape: Shape::from_code(code, params)?,
        })
    }

    pub(crate) fn write(&self, writer: &mut PackedWriter) {
        writer.f32(self.value).f32(self.time).u8(self.shape.code());
        if self.shape != Shape::Stepped {
            let (min, max) = PARAM_RANGE;
            let p = self.shape.params();
            writer
                .q16f(p.tension, min, max)
                .q16f(p.continuity, min, max)
                .q16f(p.bias, min, max);
            for param in p.params {
                writer.q16f(param, min, max);
            }
        }
    }
}

/// Extrapolation rule outside the keyed range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum Behavior {
    /// Zero
    Reset,
    /// Hold the boundary key value
    #[default]
    Constant,
    /// Loop the keyed range
    Repeat,
    /// Loop back and forth
    Oscillate,
    /// Loop, shifting each cycle by the range's value delta
    OffsetRepeat,
    /// Continue along the boundary tangent
    Linear,
}

impl Behavior {
    pub const fn code(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Constant => 1,
            Self::Repeat => 2,
            Self::Oscillate => 3,
            Self::OffsetRepeat => 4,
            Self::Linear => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Reset,
            1 => Self::Constant,
            2 => Self::Repeat,
            3 => Self::Oscillate,
            4 => Self::OffsetRepeat,
            5 => Self::Linear,
            other => {
                return Err(MotionError::format(format!(
                    "unknown envelope behavior {other}"
                )));
            }
        })
    }
}

fn hermite_basis(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t * t2;
    let h2 = 3.0 * t2 - t3 - t3;
    let h1 = 1.0 - h2;
    let h4 = t3 - t2;
    let h3 = h4 - t2 + t;
    [h1, h2, h3, h4]
}

fn bezier(x0: f32, x1: f32, x2: f32, x3: f32, t: f32) -> f32 {
    let c = 3.0 * (x1 - x0);
    let b = 3.0 * (x2 - x1) - c;
    let a = x3 - x0 - c - b;
    ((a * t + b) * t + c) * t + x0
}

/// Solve `bezier(x0, x1, x2, x3, t) == time` for `t` by bisection
fn bezier_time(x0: f32, x1: f32, x2: f32, x3: f32, time: f32) -> f32 {
    let (mut lo, mut hi) = (0.0f32, 1.0f32);
    let mut t = 0.5;
    for _ in 0..BEZIER_MAX_ITERATIONS {
        t = lo + (hi - lo) * 0.5;
        let v = bezier(x0, x1, x2, x3, t);
        if (time - v).abs() <= BEZIER_TOLERANCE {
            break;
        }
        if v > time {
            hi = t;
        } else {
            lo = t;
        }
    }
    t
}

fn bezier_2d(start: &Key, end: &Key, time: f32) -> f32 {
    let sp = start.shape.params();
    let ep = end.shape.params();
    let start_is_2d = matches!(start.shape, Shape::Bezier2D(_));

    let x = if start_is_2d {
        start.time + sp.params[2]
    } else {
        start.time + (end.time - start.time) / 3.0
    };
    let t = bezier_time(start.time, x, end.time + ep.params[0], end.time, time);

    let y = if start_is_2d {
        start.value + sp.params[3]
    } else {
        start.value + sp.params[1] / 3.0
    };
    bezier(start.value, y, end.value + ep.params[1], end.value, t)
}

/// Tangent leaving `start` towards `end`
fn outgoing(start: &Key, end: &Key, prev: Option<&Key>) -> f32 {
    let delta = end.value - start.value;
    match start.shape {
        Shape::Tcb(p) => {
            let a = (1.0 - p.tension) * (1.0 + p.continuity) * (1.0 + p.bias);
            let b = (1.0 - p.tension) * (1.0 - p.continuity) * (1.0 - p.bias);
            match prev {
                Some(prev) => {
                    let ratio = (end.time - start.time) / (end.time - prev.time);
                    ratio * (a * (start.value - prev.value) + b * delta)
                }
                None => b * delta,
            }
        }
        Shape::Linear(_) => match prev {
            Some(prev) => {
                let ratio = (end.time - start.time) / (end.time - prev.time);
                ratio * (start.value - prev.value + delta)
            }
            None => delta,
        },
        Shape::Bezier1D(p) | Shape::Hermite(p) => match prev {
            Some(prev) => p.params[1] * (end.time - start.time) / (end.time - prev.time),
            None => p.params[1],
        },
        Shape::Bezier2D(p) => {
            let out = p.params[3] * (end.time - start.time);
            if p.params[2].abs() > 1e-5 {
                out / p.params[2]
            } else {
                out * 1e5
            }
        }
        Shape::Stepped => 0.0,
    }
}

/// Tangent arriving at `end` from `start`
fn incoming(start: &Key, end: &Key, next: Option<&Key>) -> f32 {
    let delta = end.value - start.value;
    match end.shape {
        Shape::Linear(_) => match next {
            Some(next) => {
                let ratio = (end.time - start.time) / (next.time - start.time);
                ratio * (next.value - end.value + delta)
            }
            None => delta,
        },
        Shape::Tcb(p) => {
            let a = (1.0 - p.tension) * (1.0 - p.continuity) * (1.0 + p.bias);
            let b = (1.0 - p.tension) * (1.0 + p.continuity) * (1.0 - p.bias);
            match next {
                Some(next) => {
                    let ratio = (end.time - start.time) / (next.time - start.time);
                    ratio * (b * (next.value - end.value) + a * delta)
                }
                None => a * delta,
            }
        }
        Shape::Bezier1D(p) | Shape::Hermite(p) => match next {
            Some(next) => p.params[0] * (end.time - start.time) / (next.time - start.time),
            None => p.params[0],
        },
        Shape::Bezier2D(p) => {
            let inc = p.params[1] * (end.time - start.time);
            if p.params[0].abs() > 1e-5 {
                inc / p.params[0]
            } else {
                inc * 1e5
            }
        }
        Shape::Stepped => 0.0,
    }
}

/// Evaluate the curve segment `start..end` at `time`
///
/// `prev` is the key before `start` and `next` the key after `end`, when
/// they exist. The segment's shape is the shape of `end`.
pub fn evaluate(time: f32, start: &Key, end: &Key, prev: Option<&Key>, next: Option<&Key>) -> f32 {
    if time == start.time {
        return start.value;
    }
    if time == end.time {
        return end.value;
    }

    let t = (time - start.time) / (end.time - start.time);
    match end.shape {
        Shape::Stepped => start.value,
        Shape::Linear(_) => start.value + t * (end.value - start.value),
        Shape::Tcb(_) | Shape::Hermite(_) | Shape::Bezier1D(_) => {
            let out = outgoing(start, end, prev);
            let inc = incoming(start, end, next);
            let [h1, h2, h3, h4] = hermite_basis(t);
            h1 * start.value + h2 * end.value + h3 * out + h4 * inc
        }
        Shape::Bezier2D(_) => bezier_2d(start, end, time),
    }
}

/// Wrap `value` into `[lo, hi)`, returning the wrapped value and cycle number
///
/// Cycles are counted from `lo`, so a channel keyed on `[1, 3]` repeats with
/// period 2 starting at time 1 and `wrap(4.0, 1.0, 3.0)` is `(2.0, 1)`. This
/// differs from LightWave's `range()`, which measures cycles from time 0 and
/// gives 1.0 for that input when the first key is not at zero.
fn wrap(value: f32, lo: f32, hi: f32) -> (f32, i32) {
    let span = hi - lo;
    if span == 0.0 {
        return (lo, 0);
    }
    let cycle = ((value - lo) / span).floor();
    (value - cycle * span, cycle as i32)
}

/// Animated channel: keys plus pre/post behaviors
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    /// `[pre, post]`
    pub behaviors: [Behavior; 2],
    /// Keys in ascending time order
    pub keys: Vec<Key>,
}

impl Envelope {
    pub fn new(keys: Vec<Key>) -> Self {
        Self {
            behaviors: [Behavior::Constant; 2],
            keys,
        }
    }

    /// An envelope holding one value forever
    pub fn constant(value: f32) -> Self {
        Self::new(vec![Key::linear(0.0, value)])
    }

    pub(crate) fn read(reader: &mut PackedReader<'_>) -> Result<Self> {
        let behaviors = [
            Behavior::from_code(reader.u8()?)?,
            Behavior::from_code(reader.u8()?)?,
        ];
        let count = reader.u16()?;
        let keys = (0..count)
            .map(|_| Key::read(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { behaviors, keys })
    }

    pub(crate) fn write(&self, writer: &mut PackedWriter) -> Result<()> {
        let count = u16::try_from(self.keys.len()).map_err(|_| {
            MotionError::format(format!("envelope has {} keys, at most 65535 fit", self.keys.len()))
        })?;
        writer
            .u8(self.behaviors[0].code())
            .u8(self.behaviors[1].code())
            .u16(count);
        for key in &self.keys {
            key.write(writer);
        }
        Ok(())
    }

    /// Value of the channel at `time` (seconds)
    pub fn evaluate(&self, time: f32) -> f32 {
        let (first, last) = match self.keys.as_slice() {
            [] => return 0.0,
            [only] => return only.value,
            [first, .., last] => (first, last),
        };
        let keys = &self.keys;

        let mut time = time;
        let mut offset = 0.0;
        let behavior = if time < first.time {
            Some(self.behaviors[0])
        } else if time > last.time {
            Some(self.behaviors[1])
        } else {
            None
        };

        match behavior {
            None => {}
            Some(Behavior::Reset) => return 0.0,
            Some(Behavior::Constant) => {
                return if time < first.time {
                    first.value
                } else {
                    last.value
                };
            }
            Some(Behavior::Repeat) => time = wrap(time, first.time, last.time).0,
            Some(Behavior::Oscillate) => {
                let (wrapped, cycle) = wrap(time, first.time, last.time);
                time = if cycle % 2 != 0 {
                    first.time + last.time - wrapped
                } else {
                    wrapped
                };
            }
            Some(Behavior::OffsetRepeat) => {
                let (wrapped, cycle) = wrap(time, first.time, last.time);
                time = wrapped;
                offset = cycle as f32 * (last.value - first.value);
            }
            Some(Behavior::Linear) => {
                return if time < first.time {
                    let second = &keys[1];
                    let slope = outgoing(first, second, None) / (second.time - first.time);
                    slope * (time - first.time) + first.value
                } else {
                    let n = keys.len();
                    let before = &keys[n - 2];
                    let slope = incoming(before, last, None) / (last.time - before.time);
                    slope * (time - last.time) + last.value
                };
            }
        }

        // First segment whose end key is at or after `time`
        let end = keys[1..]
            .iter()
            .position(|key| time <= key.time)
            .map_or(keys.len() - 1, |i| i + 1);
        let start = end - 1;
        let prev = start.checked_sub(1).map(|i| &keys[i]);
        let next = keys.get(end + 1);

        evaluate(time, &keys[start], &keys[end], prev, next) + offset
    }

    /// Whether sampling at every frame of `frames` yields one value
    pub fn is_constant(&self, frames: RangeInclusive<i32>, fps: f32) -> bool {
        let mut samples = frames.map(|frame| self.evaluate(frame as f32 / fps));
        match samples.next() {
            Some(first) => samples.all(|value| (value - first).abs() <= f32::EPSILON),
            None => true,
        }
    }
}
