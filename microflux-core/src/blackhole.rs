//! Blackhole
//!
//! Per-thread value sink that keeps the optimizer from proving a payload's
//! result dead. Primitive values are compared against two random tombstones
//! that differ from each other, so `(v == a) & (v == b)` can never hold but
//! cannot be folded away. References escape through a sampled store whose
//! rate halves after every hit.
//!
//! Blackholes are only built by the runner. Payloads receive `&mut Blackhole`
//! through their [`InvocationContext`](crate::InvocationContext).

use crate::control::CachePadded;
use microflux_ipc::BlackholeMode;
use rand::Rng;
use std::any::Any;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Blackhole self-check failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlackholeError {
    #[error("Blackhole tombstones for {kind} are equal; refusing to run")]
    EqualTombstones { kind: &'static str },
}

/// Sentinel pairs, one per primitive width
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Tombstones {
    pub(crate) b8: [u8; 2],
    pub(crate) b16: [u16; 2],
    pub(crate) b32: [u32; 2],
    pub(crate) b64: [u64; 2],
    pub(crate) flag: [bool; 2],
    pub(crate) f32s: [f32; 2],
    pub(crate) f64s: [f64; 2],
}

impl Tombstones {
    fn check(&self) -> Result<(), BlackholeError> {
        let equal = |kind| Err(BlackholeError::EqualTombstones { kind });
        if self.b8[0] == self.b8[1] {
            return equal("u8");
        }
        if self.b16[0] == self.b16[1] {
            return equal("u16");
        }
        if self.b32[0] == self.b32[1] {
            return equal("u32");
        }
        if self.b64[0] == self.b64[1] {
            return equal("u64");
        }
        if self.flag[0] == self.flag[1] {
            return equal("bool");
        }
        if self.f32s[0] == self.f32s[1] {
            return equal("f32");
        }
        if self.f64s[0] == self.f64s[1] {
            return equal("f64");
        }
        Ok(())
    }
}

/// Where tombstone pairs come from
pub(crate) trait TombstoneSource: Send + Sync {
    fn tombstones(&self) -> Tombstones;
}

/// Random first values; the second of each pair is derived to differ
struct RandomTombstones;

impl TombstoneSource for RandomTombstones {
    fn tombstones(&self) -> Tombstones {
        let mut rng = rand::thread_rng();
        let r: u64 = rng.gen();
        let flag: bool = rng.gen();
        let f: f32 = rng.gen();
        let d: f64 = rng.gen();
        Tombstones {
            b8: [r as u8, (r as u8).wrapping_add(1)],
            b16: [r as u16, (r as u16).wrapping_add(1)],
            b32: [r as u32, (r as u32).wrapping_add(1)],
            b64: [r, r.wrapping_add(1)],
            flag: [flag, !flag],
            f32s: [f, f32::from_bits(f.to_bits() + 1)],
            f64s: [d, f64::from_bits(d.to_bits() + 1)],
        }
    }
}

/// Builds checked blackholes; owned by the runner
pub(crate) struct BlackholeFactory {
    source: Box<dyn TombstoneSource>,
}

impl BlackholeFactory {
    pub(crate) fn new() -> Self {
        Self {
            source: Box::new(RandomTombstones),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_source(source: Box<dyn TombstoneSource>) -> Self {
        Self { source }
    }

    /// One blackhole, after checking its tombstones differ
    pub(crate) fn create(&self, mode: BlackholeMode) -> Result<Blackhole, BlackholeError> {
        let tombstones = self.source.tombstones();
        tombstones.check()?;
        Ok(Blackhole {
            hot: CachePadded(tombstones),
            escape: CachePadded(EscapeState {
                seed: rand::thread_rng().gen::<u64>() | 1,
                mask: 1,
                sink: 0,
                retained: None,
            }),
            mode,
        })
    }
}

struct EscapeState {
    seed: u64,
    mask: u64,
    sink: usize,
    retained: Option<Weak<dyn Any + Send + Sync>>,
}

/// Anti-dead-code value sink, one per worker thread
pub struct Blackhole {
    hot: CachePadded<Tombstones>,
    escape: CachePadded<EscapeState>,
    mode: BlackholeMode,
}

mod sealed {
    pub trait Sealed {}
}

/// Primitive values the blackhole can consume
pub trait Consume: sealed::Sealed + Copy {
    #[doc(hidden)]
    fn hits_tombstones(self, blackhole: &Blackhole) -> bool;
}

macro_rules! consume_bits {
    ($field:ident: $($ty:ty => $bits:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Consume for $ty {
                #[inline(always)]
                fn hits_tombstones(self, blackhole: &Blackhole) -> bool {
                    let t = &blackhole.hot.$field;
                    let v = self as $bits;
                    (v == t[0]) & (v == t[1])
                }
            }
        )*
    };
}

consume_bits!(b8: u8 => u8, i8 => u8);
consume_bits!(b16: u16 => u16, i16 => u16);
consume_bits!(b32: u32 => u32, i32 => u32, char => u32);
consume_bits!(b64: u64 => u64, i64 => u64, usize => u64, isize => u64);

macro_rules! consume_value {
    ($field:ident: $ty:ty) => {
        impl sealed::Sealed for $ty {}

        impl Consume for $ty {
            #[inline(always)]
            fn hits_tombstones(self, blackhole: &Blackhole) -> bool {
                let t = &blackhole.hot.$field;
                (self == t[0]) & (self == t[1])
            }
        }
    };
}

consume_value!(flag: bool);
consume_value!(f32s: f32);
consume_value!(f64s: f64);

impl Blackhole {
    /// Consume a primitive value
    #[inline(always)]
    pub fn consume<T: Consume>(&mut self, value: T) {
        match self.mode {
            BlackholeMode::Full => {
                if value.hits_tombstones(self) {
                    tombstone_hit();
                }
            }
            BlackholeMode::Compiler => {
                std::hint::black_box(value);
            }
        }
    }

    /// Consume a borrowed object by occasionally publishing its address
    #[inline(always)]
    pub fn consume_ref<T: ?Sized>(&mut self, value: &T) {
        match self.mode {
            BlackholeMode::Full => {
                if self.sample() {
                    self.escape.sink = value as *const T as *const () as usize;
                }
            }
            BlackholeMode::Compiler => {
                std::hint::black_box(value);
            }
        }
    }

    /// Consume a shared object by occasionally retaining a weak reference
    #[inline(always)]
    pub fn consume_arc<T: Any + Send + Sync>(&mut self, value: &Arc<T>) {
        match self.mode {
            BlackholeMode::Full => {
                if self.sample() {
                    let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(value) as Weak<T>;
                    self.escape.retained = Some(weak);
                }
            }
            BlackholeMode::Compiler => {
                std::hint::black_box(value);
            }
        }
    }

    /// Consume any owned value.
    ///
    /// Full mode first sends the value's address down the sampled escape
    /// path of [`consume_ref`](Self::consume_ref); both modes then pass it
    /// through `std::hint::black_box` before dropping it.
    #[inline(always)]
    pub fn consume_opaque<T>(&mut self, value: T) {
        match self.mode {
            BlackholeMode::Full => self.consume_ref(&value),
            BlackholeMode::Compiler => {}
        }
        drop(std::hint::black_box(value));
    }

    /// Drop everything retained by earlier consumption
    pub fn evaporate(&mut self) {
        self.escape.sink = 0;
        self.escape.retained = None;
        self.escape.mask = 1;
    }

    /// Consumption strategy
    pub fn mode(&self) -> BlackholeMode {
        self.mode
    }

    #[cfg(test)]
    pub(crate) fn has_escaped(&self) -> bool {
        self.escape.sink != 0
    }

    #[inline(always)]
    fn sample(&mut self) -> bool {
        let e = &mut self.escape.0;
        e.seed = e
            .seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        if e.seed & e.mask == 0 {
            e.mask = (e.mask << 1) | 1;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Blackhole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blackhole").field("mode", &self.mode).finish()
    }
}

#[cold]
#[inline(never)]
fn tombstone_hit() -> ! {
    panic!("blackhole received a tombstone value; the harness is broken")
}
