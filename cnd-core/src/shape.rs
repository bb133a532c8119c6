#![forbid(unsafe_code)]

use std::ops::RangeInclusive;

use cnd_ast::{Env, Expr, Span};

use crate::config::SingleBound;
use crate::error::{IndexOutOfRange, ModelError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StorageOrder {
    /// Last axis varies fastest.
    #[default]
    RowMajor,
    /// First axis varies fastest.
    ColumnMajor,
}

impl StorageOrder {
    /// Order named by the string literal of a declaration.
    pub fn from_layout(text: &str) -> Option<Self> {
        match text {
            "c" | "row" | "row-major" => Some(StorageOrder::RowMajor),
            "fortran" | "column" | "column-major" => Some(StorageOrder::ColumnMajor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageOrder::RowMajor => "row-major",
            StorageOrder::ColumnMajor => "column-major",
        }
    }
}

/// Inclusive bounds of one axis. `upper` is `None` while the axis is open.
///
/// `step` scales the normalized index and `leading` is the storage length of
/// the axis, for views into a larger allocation. Both default to the dense
/// layout: a step of 1 and `extent * step` elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisSpec {
    pub lower: Expr,
    pub upper: Option<Expr>,
    pub step: Option<Expr>,
    pub leading: Option<Expr>,
}

/// The written parts of an axis, as passed to [`ShapeDescriptor::map_bounds`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisPart {
    Lower,
    Upper,
    Step,
    Leading,
}

impl AxisPart {
    pub fn as_str(self) -> &'static str {
        match self {
            AxisPart::Lower => "lo",
            AxisPart::Upper => "hi",
            AxisPart::Step => "step",
            AxisPart::Leading => "ld",
        }
    }
}

impl AxisSpec {
    pub fn new(lower: Expr, upper: Expr) -> Self {
        Self {
            lower,
            upper: Some(upper),
            step: None,
            leading: None,
        }
    }

    pub fn open(lower: Expr) -> Self {
        Self {
            lower,
            upper: None,
            step: None,
            leading: None,
        }
    }

    /// Axis written with a single bound.
    pub fn single(bound: Expr, mode: SingleBound) -> Self {
        match mode {
            SingleBound::Inclusive => AxisSpec::new(Expr::int(0), bound),
            SingleBound::Extent => AxisSpec::new(Expr::int(0), Expr::sub(bound, Expr::int(1))),
        }
    }

    pub fn with_step(mut self, step: Option<Expr>) -> Self {
        self.step = step;
        self
    }

    pub fn with_leading(mut self, leading: Option<Expr>) -> Self {
        self.leading = leading;
        self
    }

    pub fn is_open(&self) -> bool {
        self.upper.is_none()
    }

    /// `hi - lo + 1`
    pub fn extent(&self) -> Option<Expr> {
        let upper = self.upper.clone()?;
        Some(Expr::add(Expr::sub(upper, self.lower.clone()), Expr::int(1)))
    }

    /// Elements the axis occupies in storage: the written leading dimension,
    /// or `extent * step`.
    pub fn leading_dim(&self) -> Option<Expr> {
        if let Some(ld) = &self.leading {
            return Some(ld.clone());
        }
        let ext = self.extent()?;
        Some(match &self.step {
            Some(step) => Expr::mul(ext, step.clone()),
            None => ext,
        })
    }

    /// `hi + 1`
    pub fn past_upper(&self) -> Option<Expr> {
        let upper = self.upper.clone()?;
        Some(Expr::add(upper, Expr::int(1)))
    }

    /// `(idx - lo) * step`
    pub fn normalize(&self, index: Expr) -> Expr {
        let normalized = Expr::sub(index, self.lower.clone());
        match &self.step {
            Some(step) => Expr::mul(normalized, step.clone()),
            None => normalized,
        }
    }

    /// Close an open axis given its extent: `hi = lo + ext - 1`.
    fn resolved(&self, extent: Expr) -> AxisSpec {
        let upper = Expr::sub(Expr::add(self.lower.clone(), extent), Expr::int(1));
        AxisSpec {
            upper: Some(upper),
            ..self.clone()
        }
    }
}

/// Bounds and storage order bound to one declaration of a symbol.
///
/// Extents and strides are derived once at construction; every site that uses
/// the descriptor reads the cached expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeDescriptor {
    name: String,
    order: StorageOrder,
    axes: Vec<AxisSpec>,
    span: Span,
    extents: Vec<Option<Expr>>,
    leading: Vec<Option<Expr>>,
    strides: Vec<Option<Expr>>,
}

impl ShapeDescriptor {
    pub fn new(name: impl Into<String>, order: StorageOrder, axes: Vec<AxisSpec>, span: Span) -> Self {
        let extents: Vec<Option<Expr>> = axes.iter().map(AxisSpec::extent).collect();
        let leading: Vec<Option<Expr>> = axes.iter().map(AxisSpec::leading_dim).collect();
        let strides = compute_strides(order, &axes, &leading);
        Self {
            name: name.into(),
            order,
            axes,
            span,
            extents,
            leading,
            strides,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> StorageOrder {
        self.order
    }

    pub fn axes(&self) -> &[AxisSpec] {
        &self.axes
    }

    pub fn axis(&self, k: usize) -> Option<&AxisSpec> {
        self.axes.get(k)
    }

    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Span of the declaration that created this descriptor.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn extent(&self, k: usize) -> Option<&Expr> {
        self.extents.get(k)?.as_ref()
    }

    /// Storage length of axis `k`; the multiplier that steps over it.
    pub fn leading_dim(&self, k: usize) -> Option<&Expr> {
        self.leading.get(k)?.as_ref()
    }

    /// Distance in elements between neighbours along axis `k`.
    pub fn stride(&self, k: usize) -> Option<&Expr> {
        self.strides.get(k)?.as_ref()
    }

    pub fn open_axes(&self) -> Vec<usize> {
        self.axes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_open())
            .map(|(k, _)| k)
            .collect()
    }

    pub fn first_open_axis(&self) -> Option<usize> {
        self.axes.iter().position(AxisSpec::is_open)
    }

    /// Elements of storage the shape spans: the product of the leading
    /// dimensions, which is the product of the extents for a dense layout.
    /// `None` while any axis is open.
    pub fn element_count(&self) -> Option<Expr> {
        let mut count = Expr::int(1);
        for ld in &self.leading {
            count = Expr::mul(count, ld.clone()?);
        }
        Some(count)
    }

    /// A copy with the open axes closed, in axis order, by `extents`.
    /// Extra extents are ignored and missing ones leave axes open.
    pub fn with_resolved(&self, extents: &[Expr]) -> ShapeDescriptor {
        let mut supplied = extents.iter();
        let axes = self
            .axes
            .iter()
            .map(|axis| {
                if axis.is_open() {
                    if let Some(ext) = supplied.next() {
                        return axis.resolved(ext.clone());
                    }
                }
                axis.clone()
            })
            .collect();
        ShapeDescriptor::new(self.name.clone(), self.order, axes, self.span)
    }

    /// A copy whose written bounds, steps and leading dimensions are replaced
    /// by `f(axis, part, expr)`.
    pub fn map_bounds(&self, mut f: impl FnMut(usize, AxisPart, &Expr) -> Expr) -> ShapeDescriptor {
        let axes = self
            .axes
            .iter()
            .enumerate()
            .map(|(k, axis)| AxisSpec {
                lower: f(k, AxisPart::Lower, &axis.lower),
                upper: axis.upper.as_ref().map(|u| f(k, AxisPart::Upper, u)),
                step: axis.step.as_ref().map(|s| f(k, AxisPart::Step, s)),
                leading: axis.leading.as_ref().map(|l| f(k, AxisPart::Leading, l)),
            })
            .collect();
        ShapeDescriptor::new(self.name.clone(), self.order, axes, self.span)
    }

    /// Evaluate every bound for concrete variable values.
    pub fn evaluate(&self, env: &(impl Env + ?Sized)) -> Result<ConcreteShape, ModelError> {
        let mut axes = Vec::with_capacity(self.rank());
        for (axis, spec) in self.axes.iter().enumerate() {
            let lo = spec.lower.eval(env)?;
            let Some(upper) = &spec.upper else {
                return Err(ModelError::OpenAxis { axis });
            };
            let hi = upper.eval(env)?;
            let step = match &spec.step {
                Some(step) => step.eval(env)?,
                None => 1,
            };
            let leading = spec.leading.as_ref().map(|l| l.eval(env)).transpose()?;
            axes.push(ConcreteAxis { lo, hi, step, leading });
        }
        ConcreteShape::from_axes(self.order, axes)
    }
}

/// Per-axis element strides: the product of the leading dimensions of the
/// faster axes, times the axis step.
fn compute_strides(order: StorageOrder, axes: &[AxisSpec], leading: &[Option<Expr>]) -> Vec<Option<Expr>> {
    let n = axes.len();
    let mut strides = vec![None; n];
    let mut running = Some(Expr::int(1));
    let walk: Vec<usize> = match order {
        StorageOrder::RowMajor => (0..n).rev().collect(),
        StorageOrder::ColumnMajor => (0..n).collect(),
    };
    for k in walk {
        strides[k] = match (&running, &axes[k].step) {
            (Some(r), Some(step)) => Some(Expr::mul(r.clone(), step.clone())),
            (r, None) => r.clone(),
            (None, Some(_)) => None,
        };
        running = match (running, &leading[k]) {
            (Some(r), Some(ld)) => Some(Expr::mul(r, ld.clone())),
            _ => None,
        };
    }
    strides
}

/// One axis with every part evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcreteAxis {
    pub lo: i64,
    pub hi: i64,
    pub step: i64,
    pub leading: Option<i64>,
}

impl ConcreteAxis {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self {
            lo,
            hi,
            step: 1,
            leading: None,
        }
    }
}

/// A shape with every bound evaluated; the reference for offset arithmetic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcreteShape {
    order: StorageOrder,
    bounds: Vec<(i64, i64)>,
    extents: Vec<usize>,
    leading: Vec<usize>,
    strides: Vec<usize>,
    element_count: usize,
}

impl ConcreteShape {
    /// A dense shape over inclusive `(lo, hi)` bounds.
    pub fn new(order: StorageOrder, bounds: Vec<(i64, i64)>) -> Result<Self, ModelError> {
        let axes = bounds.into_iter().map(|(lo, hi)| ConcreteAxis::new(lo, hi)).collect();
        Self::from_axes(order, axes)
    }

    pub fn from_axes(order: StorageOrder, axes: Vec<ConcreteAxis>) -> Result<Self, ModelError> {
        let n = axes.len();
        let mut extents = Vec::with_capacity(n);
        let mut steps = Vec::with_capacity(n);
        let mut leading = Vec::with_capacity(n);
        for (axis, a) in axes.iter().enumerate() {
            let ext = a
                .hi
                .checked_sub(a.lo)
                .and_then(|d| d.checked_add(1))
                .ok_or(ModelError::Overflow)?;
            if ext < 0 {
                return Err(ModelError::NegativeExtent {
                    axis,
                    lo: a.lo,
                    hi: a.hi,
                });
            }
            let ext = usize::try_from(ext).map_err(|_| ModelError::Overflow)?;
            let step = match usize::try_from(a.step) {
                Ok(step) if step > 0 => step,
                _ => return Err(ModelError::InvalidStep { axis, step: a.step }),
            };
            // The last element sits at (ext - 1) * step.
            let needed = match ext {
                0 => 0,
                _ => (ext - 1)
                    .checked_mul(step)
                    .and_then(|v| v.checked_add(1))
                    .ok_or(ModelError::Overflow)?,
            };
            let ld = match a.leading {
                Some(ld) => match usize::try_from(ld) {
                    Ok(ld) if ld >= needed => ld,
                    _ => return Err(ModelError::LeadingDimTooSmall { axis, leading: ld, needed }),
                },
                None => ext.checked_mul(step).ok_or(ModelError::Overflow)?,
            };
            extents.push(ext);
            steps.push(step);
            leading.push(ld);
        }

        let mut strides = vec![0; n];
        let mut running: usize = 1;
        let walk: Vec<usize> = match order {
            StorageOrder::RowMajor => (0..n).rev().collect(),
            StorageOrder::ColumnMajor => (0..n).collect(),
        };
        for k in walk {
            strides[k] = running.checked_mul(steps[k]).ok_or(ModelError::Overflow)?;
            running = running.checked_mul(leading[k]).ok_or(ModelError::Overflow)?;
        }

        Ok(Self {
            order,
            bounds: axes.iter().map(|a| (a.lo, a.hi)).collect(),
            extents,
            leading,
            strides,
            element_count: running,
        })
    }

    pub fn order(&self) -> StorageOrder {
        self.order
    }

    pub fn rank(&self) -> usize {
        self.bounds.len()
    }

    pub fn bounds(&self) -> &[(i64, i64)] {
        &self.bounds
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn leading_dims(&self) -> &[usize] {
        &self.leading
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Linear offset of `indices`, checked against every axis range.
    pub fn offset(&self, indices: &[i64]) -> Result<usize, ModelError> {
        if indices.len() != self.rank() {
            return Err(ModelError::Arity {
                expected: self.rank(),
                found: indices.len(),
            });
        }
        let mut offset: usize = 0;
        for (axis, (&value, &(lo, hi))) in indices.iter().zip(&self.bounds).enumerate() {
            if value < lo || value > hi {
                return Err(IndexOutOfRange { axis, value, lo, hi }.into());
            }
            // In range, so the difference fits and is non-negative.
            let normalized = usize::try_from(value.abs_diff(lo)).map_err(|_| ModelError::Overflow)?;
            offset = normalized
                .checked_mul(self.strides[axis])
                .and_then(|v| v.checked_add(offset))
                .ok_or(ModelError::Overflow)?;
        }
        Ok(offset)
    }

    /// The values an axis iteration visits, in ascending order.
    pub fn axis_values(&self, k: usize) -> Result<RangeInclusive<i64>, ModelError> {
        let &(lo, hi) = self.bounds.get(k).ok_or(ModelError::AxisOutOfRange {
            axis: k,
            rank: self.rank(),
        })?;
        Ok(lo..=hi)
    }
}
