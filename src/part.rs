//! Parametric part: parameter ranges, the kernel recipe, and its on-screen view.
//!
//! DESIGN
//! ======
//! The part is an L-shaped bracket. `build_part` drives the kernel through the
//! recipe for one `PartParameters` value; the whole parameter record is the
//! dependency key, so any change means one new build. `PartView` is the
//! consumer side: it asks the geometry cache for the current parameters and
//! keeps showing the last geometry that resolved until a newer one lands.
//!
//! ERROR HANDLING
//! ==============
//! A failed rebuild is logged and remembered in `last_error`; the displayed
//! geometry is left untouched. Superseded builds are dropped silently.

#[cfg(test)]
#[path = "part_test.rs"]
mod part_test;

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::Vec3;
use tracing::{debug, warn};

use crate::cache::{BuildError, Fetch, GeometryCache, Suspended};
use crate::error::ErrorCode;
use crate::kernel::{BufferGeometry, KernelError, KernelHandle, Profile};
use crate::key::DependencyKey;
use crate::model::{PartParameters, PartialPart};

/// Geometry as handed to the renderer. Cloning shares the buffers.
pub type PartGeometry = Arc<BufferGeometry>;

const DEPTH: f32 = 100.0;
const FILLET_RADIUS: f32 = 5.0;
const CUT_LENGTH: f32 = 200.0;

// =============================================================================
// RANGES
// =============================================================================

/// Inclusive `[min, max]` with a snapping `step`, enforced where input enters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamRange {
    /// Snap `value` to the nearest step from `min`, then clamp into range.
    /// NaN falls back to `min`.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        let snapped = self.min + ((value - self.min) / self.step).round() * self.step;
        snapped.clamp(self.min, self.max)
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartField {
    Width,
    Cut1,
    Cut2,
    Offset,
}

impl PartField {
    pub const ALL: [Self; 4] = [Self::Width, Self::Cut1, Self::Cut2, Self::Offset];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Width => "width",
            Self::Cut1 => "cut1",
            Self::Cut2 => "cut2",
            Self::Offset => "offset",
        }
    }

    #[must_use]
    pub fn range(self) -> ParamRange {
        match self {
            Self::Width => ParamRange { min: 30.0, max: 200.0, step: 1.0 },
            Self::Cut1 | Self::Cut2 => ParamRange { min: 10.0, max: 80.0, step: 1.0 },
            Self::Offset => ParamRange { min: 0.0, max: 5.0, step: 0.1 },
        }
    }
}

/// Clamp every present field of a partial update into its declared range.
#[must_use]
pub fn clamp_partial(partial: &PartialPart) -> PartialPart {
    PartialPart {
        width: partial.width.map(|v| PartField::Width.range().clamp(v)),
        cut1: partial.cut1.map(|v| PartField::Cut1.range().clamp(v)),
        cut2: partial.cut2.map(|v| PartField::Cut2.range().clamp(v)),
        offset: partial.offset.map(|v| PartField::Offset.range().clamp(v)),
    }
}

impl PartParameters {
    /// Geometry cache key: every field, in declaration order.
    #[must_use]
    pub fn dependency_key(&self) -> DependencyKey {
        DependencyKey::from((self.width, self.cut1, self.cut2, self.offset))
    }
}

// =============================================================================
// RECIPE
// =============================================================================

/// Build the bracket for `params` on `kernel` and export its mesh.
///
/// # Errors
///
/// Returns the first kernel error; no partial geometry is produced.
#[allow(clippy::cast_possible_truncation)]
pub async fn build_part(kernel: KernelHandle, params: PartParameters) -> Result<PartGeometry, KernelError> {
    let width = params.width as f32;

    let profile = Profile::new()
        .line_to(width, 0.0)
        .line_to(width, 20.0)
        .line_to(20.0, 20.0)
        .line_to(20.0, 50.0)
        .line_to(10.0, 50.0)
        .line_to(10.0, 100.0)
        .line_to(0.0, 100.0)
        .line_to(0.0, 0.0);
    let body = kernel.extrude(Vec3::new(0.0, 0.0, DEPTH), &profile).await?;

    let outer = kernel
        .pick_edges(
            body,
            &[
                Vec3::new(width, 10.0, 0.0),
                Vec3::new(width, 10.0, DEPTH),
                Vec3::new(5.0, 100.0, DEPTH),
                Vec3::new(5.0, 100.0, 0.0),
            ],
        )
        .await?;
    let inner = kernel
        .pick_edges(body, &[Vec3::new(10.0, 50.0, 50.0), Vec3::new(0.0, 0.0, 50.0), Vec3::new(20.0, 20.0, 50.0)])
        .await?;
    kernel.fillet(FILLET_RADIUS, &outer).await?;
    kernel.fillet(FILLET_RADIUS, &inner).await?;

    // Cross bore along x through the upright, vertical bore through the foot.
    let bore = kernel.cylinder(CUT_LENGTH, params.cut1 as f32).await?;
    kernel.move_to(bore, Vec3::new(-50.0, 50.0, 50.0)).await?;
    kernel.rotate_to(bore, Vec3::new(0.0, FRAC_PI_2, 0.0)).await?;
    let slot = kernel.cylinder(CUT_LENGTH, params.cut2 as f32).await?;
    kernel.move_to(slot, Vec3::new(width * 0.55, 50.0, 50.0)).await?;
    kernel.rotate_to(slot, Vec3::new(FRAC_PI_2, 0.0, 0.0)).await?;
    kernel.subtract(body, false, &[bore, slot]).await?;

    kernel.offset(body, params.offset as f32).await?;
    let mesh = kernel.export_geometry(body).await?;
    debug!(width, triangles = mesh.triangle_count(), "part built");
    Ok(Arc::new(mesh))
}

// =============================================================================
// VIEW
// =============================================================================

/// Renderer-facing holder of the part geometry.
pub struct PartView {
    cache: GeometryCache<PartGeometry>,
    displayed: Option<(PartParameters, PartGeometry)>,
    pending: Option<(PartParameters, Suspended<PartGeometry>)>,
    last_error: Option<BuildError>,
}

impl PartView {
    #[must_use]
    pub fn new(cache: GeometryCache<PartGeometry>) -> Self {
        Self { cache, displayed: None, pending: None, last_error: None }
    }

    /// Ask for geometry matching `params`. Returns true if it was already
    /// cached and is now displayed.
    pub fn request(&mut self, params: PartParameters) -> bool {
        match self.cache.cache(move |kernel| build_part(kernel, params), params.dependency_key()) {
            Fetch::Ready(geometry) => {
                self.pending = None;
                self.show(params, geometry);
                true
            }
            Fetch::Suspended(suspended) => {
                self.pending = Some((params, suspended));
                false
            }
        }
    }

    /// Pick up a finished build without waiting. Returns true if the
    /// displayed geometry changed.
    pub fn poll(&mut self) -> bool {
        let Some(result) = self.pending.as_ref().and_then(|(_, s)| s.try_resolve()) else {
            return false;
        };
        let Some((params, _)) = self.pending.take() else {
            return false;
        };
        self.absorb(params, result)
    }

    /// Wait for the pending build, if any. Returns true if the displayed
    /// geometry changed.
    pub async fn settle(&mut self) -> bool {
        let Some((params, suspended)) = self.pending.take() else {
            return false;
        };
        let result = suspended.await;
        self.absorb(params, result)
    }

    #[must_use]
    pub fn geometry(&self) -> Option<&PartGeometry> {
        self.displayed.as_ref().map(|(_, g)| g)
    }

    /// Parameters the displayed geometry was built from.
    #[must_use]
    pub fn displayed_params(&self) -> Option<PartParameters> {
        self.displayed.as_ref().map(|(p, _)| *p)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&BuildError> {
        self.last_error.as_ref()
    }

    fn show(&mut self, params: PartParameters, geometry: PartGeometry) {
        self.displayed = Some((params, geometry));
        self.last_error = None;
    }

    fn absorb(&mut self, params: PartParameters, result: Result<PartGeometry, BuildError>) -> bool {
        match result {
            Ok(geometry) => {
                self.show(params, geometry);
                true
            }
            Err(BuildError::Superseded { key }) => {
                debug!(%key, "superseded part build ignored");
                false
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), width = params.width, "rebuild failed; keeping last good geometry");
                self.last_error = Some(e);
                false
            }
        }
    }
}
