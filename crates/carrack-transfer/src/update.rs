//! Pending partial updates and their application
//!
//! A partial update is a payload handle plus the region it targets. Updates
//! are applied strictly in submission order on a single stream, each after
//! its payload's `ready` event, either overwriting the region (replica mode)
//! or folding the payload into it with an associative operator (op mode).

use crate::handle::{AsyncHandle, Retained};
use carrack_core::{CarrackError, Element, ElementType, IndexRange, Region, Result};
use carrack_effects::Stream;
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Element-wise associative operator over raw element bytes
pub trait Combine: Send + Sync + fmt::Debug {
    /// Fold `update` into `acc`; both hold whole `dtype` elements
    fn combine(&self, dtype: ElementType, acc: &mut [u8], update: &[u8]) -> Result<()>;

    /// Bytes of one identity element, for positions a chunk does not own
    fn identity(&self, dtype: ElementType) -> Result<Vec<u8>> {
        Err(CarrackError::unsupported_dtype(
            dtype,
            "identity of a custom combine operator",
        ))
    }
}

/// Built-in reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceOp {
    /// Addition (wrapping for integers, logical or for bool)
    Sum,
    /// Multiplication (wrapping for integers, logical and for bool)
    Prod,
    /// Maximum; nan wins for floats
    Max,
    /// Minimum; nan wins for floats
    Min,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::Max => "max",
            Self::Min => "min",
        })
    }
}

fn fold<T: Element>(acc: &mut [u8], update: &[u8], f: impl Fn(T, T) -> T) {
    let width = T::DTYPE.size_bytes();
    for (a, u) in acc.chunks_exact_mut(width).zip(update.chunks_exact(width)) {
        f(T::read_bytes(a), T::read_bytes(u)).write_bytes(a);
    }
}

fn scalar<T: Element>(value: T) -> Vec<u8> {
    let mut out = vec![0u8; T::DTYPE.size_bytes()];
    value.write_bytes(&mut out);
    out
}

macro_rules! fold_integer {
    ($op:expr, $ty:ty, $acc:expr, $update:expr) => {
        fold::<$ty>($acc, $update, |a, b| match $op {
            ReduceOp::Sum => a.wrapping_add(b),
            ReduceOp::Prod => a.wrapping_mul(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        })
    };
}

macro_rules! fold_float {
    ($op:expr, $ty:ty, $acc:expr, $update:expr) => {
        fold::<$ty>($acc, $update, |a, b| match $op {
            ReduceOp::Sum => a + b,
            ReduceOp::Prod => a * b,
            ReduceOp::Max if a.is_nan() || b.is_nan() => <$ty>::NAN,
            ReduceOp::Min if a.is_nan() || b.is_nan() => <$ty>::NAN,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        })
    };
}

macro_rules! fold_complex {
    ($op:expr, $ty:ty, $acc:expr, $update:expr) => {{
        let w = std::mem::size_of::<$ty>();
        for (a, u) in $acc.chunks_exact_mut(2 * w).zip($update.chunks_exact(2 * w)) {
            let (ar, ai) = (<$ty as Element>::read_bytes(&a[..w]), <$ty as Element>::read_bytes(&a[w..]));
            let (ur, ui) = (<$ty as Element>::read_bytes(&u[..w]), <$ty as Element>::read_bytes(&u[w..]));
            let (re, im) = if $op == ReduceOp::Sum {
                (ar + ur, ai + ui)
            } else {
                (ar * ur - ai * ui, ar * ui + ai * ur)
            };
            re.write_bytes(&mut a[..w]);
            im.write_bytes(&mut a[w..]);
        }
    }};
}

macro_rules! integer_identity {
    ($op:expr, $ty:ty) => {
        scalar::<$ty>(match $op {
            ReduceOp::Sum => 0,
            ReduceOp::Prod => 1,
            ReduceOp::Max => <$ty>::MIN,
            ReduceOp::Min => <$ty>::MAX,
        })
    };
}

impl Combine for ReduceOp {
    fn combine(&self, dtype: ElementType, acc: &mut [u8], update: &[u8]) -> Result<()> {
        if acc.len() != update.len() {
            return Err(CarrackError::invalid(format!(
                "cannot combine {} bytes with {} bytes",
                update.len(),
                acc.len()
            )));
        }
        let op = *self;
        match dtype {
            ElementType::Bool => fold::<bool>(acc, update, |a, b| match op {
                ReduceOp::Sum | ReduceOp::Max => a || b,
                ReduceOp::Prod | ReduceOp::Min => a && b,
            }),
            ElementType::Int8 => fold_integer!(op, i8, acc, update),
            ElementType::UInt8 => fold_integer!(op, u8, acc, update),
            ElementType::Int16 => fold_integer!(op, i16, acc, update),
            ElementType::UInt16 => fold_integer!(op, u16, acc, update),
            ElementType::Int32 => fold_integer!(op, i32, acc, update),
            ElementType::UInt32 => fold_integer!(op, u32, acc, update),
            ElementType::Int64 => fold_integer!(op, i64, acc, update),
            ElementType::UInt64 => fold_integer!(op, u64, acc, update),
            ElementType::Float16 => fold_float!(op, f16, acc, update),
            ElementType::Float32 => fold_float!(op, f32, acc, update),
            ElementType::Float64 => fold_float!(op, f64, acc, update),
            ElementType::Complex64 | ElementType::Complex128
                if matches!(op, ReduceOp::Max | ReduceOp::Min) =>
            {
                return Err(CarrackError::unsupported_dtype(dtype, format!("{op} combine")));
            }
            ElementType::Complex64 => fold_complex!(op, f32, acc, update),
            ElementType::Complex128 => fold_complex!(op, f64, acc, update),
            ElementType::Opaque(_) => {
                return Err(CarrackError::unsupported_dtype(dtype, format!("{op} combine")));
            }
        }
        Ok(())
    }

    fn identity(&self, dtype: ElementType) -> Result<Vec<u8>> {
        let op = *self;
        let bytes = match dtype {
            ElementType::Bool => scalar(matches!(op, ReduceOp::Prod | ReduceOp::Min)),
            ElementType::Int8 => integer_identity!(op, i8),
            ElementType::UInt8 => integer_identity!(op, u8),
            ElementType::Int16 => integer_identity!(op, i16),
            ElementType::UInt16 => integer_identity!(op, u16),
            ElementType::Int32 => integer_identity!(op, i32),
            ElementType::UInt32 => integer_identity!(op, u32),
            ElementType::Int64 => integer_identity!(op, i64),
            ElementType::UInt64 => integer_identity!(op, u64),
            ElementType::Float16 => scalar(match op {
                ReduceOp::Sum => f16::ZERO,
                ReduceOp::Prod => f16::ONE,
                ReduceOp::Max => f16::NEG_INFINITY,
                ReduceOp::Min => f16::INFINITY,
            }),
            ElementType::Float32 => scalar(match op {
                ReduceOp::Sum => 0.0f32,
                ReduceOp::Prod => 1.0,
                ReduceOp::Max => f32::NEG_INFINITY,
                ReduceOp::Min => f32::INFINITY,
            }),
            ElementType::Float64 => scalar(match op {
                ReduceOp::Sum => 0.0f64,
                ReduceOp::Prod => 1.0,
                ReduceOp::Max => f64::NEG_INFINITY,
                ReduceOp::Min => f64::INFINITY,
            }),
            ElementType::Complex64 | ElementType::Complex128 => {
                let half_width = dtype.size_bytes() / 2;
                let mut bytes = vec![0u8; dtype.size_bytes()];
                match op {
                    ReduceOp::Sum => {}
                    ReduceOp::Prod if half_width == 4 => 1.0f32.write_bytes(&mut bytes[..4]),
                    ReduceOp::Prod => 1.0f64.write_bytes(&mut bytes[..8]),
                    ReduceOp::Max | ReduceOp::Min => {
                        return Err(CarrackError::unsupported_dtype(
                            dtype,
                            format!("{op} identity"),
                        ));
                    }
                }
                bytes
            }
            ElementType::Opaque(_) => {
                return Err(CarrackError::unsupported_dtype(dtype, format!("{op} identity")));
            }
        };
        Ok(bytes)
    }
}

/// Typed caller-supplied operator
///
/// ```ignore
/// let saturating = CombineFn::new(|a: u8, b: u8| a.saturating_add(b)).with_identity(0);
/// ```
pub struct CombineFn<T, F> {
    f: F,
    identity: Option<T>,
    _marker: PhantomData<fn(T, T) -> T>,
}

impl<T, F> CombineFn<T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    /// Wrap `f`, which must be associative
    pub fn new(f: F) -> Self {
        Self {
            f,
            identity: None,
            _marker: PhantomData,
        }
    }

    /// Declare the identity element of `f`
    #[must_use]
    pub fn with_identity(mut self, identity: T) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl<T: Element, F> fmt::Debug for CombineFn<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombineFn")
            .field("dtype", &T::DTYPE)
            .field("identity", &self.identity)
            .finish()
    }
}

impl<T, F> Combine for CombineFn<T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    fn combine(&self, dtype: ElementType, acc: &mut [u8], update: &[u8]) -> Result<()> {
        if dtype != T::DTYPE {
            return Err(CarrackError::unsupported_dtype(
                dtype,
                format!("combine function over {}", T::DTYPE),
            ));
        }
        if acc.len() != update.len() {
            return Err(CarrackError::invalid(format!(
                "cannot combine {} bytes with {} bytes",
                update.len(),
                acc.len()
            )));
        }
        fold::<T>(acc, update, &self.f);
        Ok(())
    }

    fn identity(&self, dtype: ElementType) -> Result<Vec<u8>> {
        match self.identity {
            Some(value) if dtype == T::DTYPE => Ok(scalar(value)),
            _ => Err(CarrackError::unsupported_dtype(
                dtype,
                "identity of a combine function",
            )),
        }
    }
}

/// How queued updates merge into their target
#[derive(Debug, Clone)]
pub enum UpdateMode {
    /// Overwrite the region
    Replica,
    /// Combine into the region with an associative operator
    Op(Arc<dyn Combine>),
}

impl UpdateMode {
    /// Op mode with `combine`
    pub fn op(combine: impl Combine + 'static) -> Self {
        Self::Op(Arc::new(combine))
    }

    /// Whether this is replica mode
    pub fn is_replica(&self) -> bool {
        matches!(self, Self::Replica)
    }
}

/// A queued mutation of one chunk
#[derive(Debug, Clone)]
pub struct PartialUpdate {
    data: AsyncHandle,
    region: Region,
}

impl PartialUpdate {
    /// Update `region` of the target with `data`
    pub fn new(data: AsyncHandle, region: Region) -> Self {
        Self { data, region }
    }

    /// Whole-array update
    pub fn whole(data: AsyncHandle) -> Self {
        Self::new(data, Region::full())
    }

    /// Payload
    pub fn data(&self) -> &AsyncHandle {
        &self.data
    }

    /// Target region, in the target's coordinates
    pub fn region(&self) -> &Region {
        &self.region
    }
}

/// Apply `updates` to `target` in order on `stream`
///
/// Every update is validated before anything is enqueued. If the target
/// buffer is still referenced elsewhere it is copied first, so earlier
/// readers keep seeing the old contents. The returned handle is ready after
/// the last update.
pub fn apply_updates(
    target: &AsyncHandle,
    updates: &[PartialUpdate],
    mode: &UpdateMode,
    stream: &Stream,
) -> Result<AsyncHandle> {
    if stream.device() != target.device() {
        return Err(CarrackError::invalid(format!(
            "updates to {} cannot run on a stream of {}",
            target.device(),
            stream.device()
        )));
    }
    let mut resolved: Vec<Vec<IndexRange>> = Vec::with_capacity(updates.len());
    for update in updates {
        let data = update.data();
        if data.device() != target.device() {
            return Err(CarrackError::invalid(format!(
                "update payload lives on {}, target on {}",
                data.device(),
                target.device()
            )));
        }
        if data.dtype() != target.dtype() {
            return Err(CarrackError::invalid(format!(
                "update of {} cannot apply to a {} array",
                data.dtype(),
                target.dtype()
            )));
        }
        let ranges = update.region().resolve(target.shape())?;
        let shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        if shape != data.shape() {
            return Err(CarrackError::invalid(format!(
                "update of shape {:?} does not fit region {} of shape {shape:?}",
                data.shape(),
                update.region()
            )));
        }
        resolved.push(ranges);
    }
    if updates.is_empty() {
        return Ok(target.clone());
    }

    stream.wait_event(target.ready())?;
    let copied = target.array().is_shared();
    let array = if copied {
        target.array().copy_on(stream)?
    } else {
        target.array().clone()
    };

    let dtype = target.dtype();
    for (update, ranges) in updates.iter().zip(resolved) {
        stream.wait_event(update.data().ready())?;
        let dst = array.clone();
        let payload = update.data().array().clone();
        match mode {
            UpdateMode::Replica => stream.enqueue("replica update", move || {
                dst.write_region(&ranges, &payload.read_bytes())
            })?,
            UpdateMode::Op(combine) => {
                let combine = Arc::clone(combine);
                stream.enqueue("combine update", move || {
                    let mut acc = dst.read_region(&ranges)?;
                    combine.combine(dtype, &mut acc, &payload.read_bytes())?;
                    dst.write_region(&ranges, &acc)
                })?;
            }
        }
    }

    let ready = stream.record()?;
    let mut retain: Vec<Retained> = updates
        .iter()
        .map(|u| Retained::Handle(u.data().clone()))
        .collect();
    if copied {
        retain.push(Retained::Handle(target.clone()));
    } else {
        retain.extend(target.compact().retained().iter().cloned());
    }
    tracing::trace!(
        device = %target.device(),
        updates = updates.len(),
        copied,
        "partial updates enqueued"
    );
    Ok(AsyncHandle::with_retained(array, ready, retain))
}
