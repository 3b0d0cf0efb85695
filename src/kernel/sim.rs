//! In-process kernel double.
//!
//! Tracks solids as axis-aligned bounds, records every call, and exports the
//! bounds as a box mesh. It performs no real modeling; it exists so builders,
//! the cache, and the demo can run without a kernel server. Failures and
//! latency are injectable per operation.

#[cfg(test)]
#[path = "sim_test.rs"]
mod sim_test;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glam::Vec3;
use parking_lot::Mutex;

use super::{BufferGeometry, EdgeId, GeometryKernel, KernelEndpoint, KernelError, KernelHandle, Profile, SolidId};

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: Vec3,
    max: Vec3,
}

impl Bounds {
    fn translated_to(self, center: Vec3) -> Self {
        let half = (self.max - self.min) * 0.5;
        Self { min: center - half, max: center + half }
    }

    fn grown(self, by: f32) -> Self {
        Self { min: self.min - Vec3::splat(by), max: self.max + Vec3::splat(by) }
    }
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    solids: HashMap<SolidId, Bounds>,
    edges: HashMap<EdgeId, SolidId>,
    log: Vec<&'static str>,
    failing: HashSet<&'static str>,
}

impl SimState {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn solid(&self, id: SolidId) -> Result<Bounds, KernelError> {
        self.solids.get(&id).copied().ok_or(KernelError::UnknownSolid(id))
    }
}

/// Deterministic stand-in for the remote kernel.
pub struct SimKernel {
    state: Mutex<SimState>,
    latency: Mutex<Option<Duration>>,
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKernel {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(SimState::default()), latency: Mutex::new(None) }
    }

    /// Connector usable with `KernelSession::handle`.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` for an empty endpoint url.
    pub async fn connect(endpoint: KernelEndpoint) -> Result<KernelHandle, KernelError> {
        if endpoint.url.is_empty() {
            return Err(KernelError::Disconnected);
        }
        Ok(Arc::new(Self::new()))
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make every later call of `op` fail until `heal`.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().failing.insert(op);
    }

    pub fn heal(&self) {
        self.state.lock().failing.clear();
    }

    /// Number of recorded calls of `op`.
    #[must_use]
    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().log.iter().filter(|o| **o == op).count()
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn log(&self) -> Vec<&'static str> {
        self.state.lock().log.clone()
    }

    /// Number of live solids.
    #[must_use]
    pub fn solid_count(&self) -> usize {
        self.state.lock().solids.len()
    }

    async fn enter(&self, op: &'static str) -> Result<(), KernelError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.log.push(op);
        if state.failing.contains(op) {
            return Err(KernelError::Rejected { op, message: "injected failure".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl GeometryKernel for SimKernel {
    async fn extrude(&self, direction: Vec3, profile: &Profile) -> Result<SolidId, KernelError> {
        self.enter("extrude").await?;
        let (lo, hi) = profile
            .points()
            .iter()
            .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), p| {
                let p = p.extend(0.0);
                (lo.min(p), hi.max(p))
            });
        if lo.x > hi.x {
            return Err(KernelError::Rejected { op: "extrude", message: "empty profile".into() });
        }
        let bounds = Bounds { min: lo.min(lo + direction), max: hi.max(hi + direction) };
        let mut state = self.state.lock();
        let id = state.alloc();
        state.solids.insert(id, bounds);
        Ok(id)
    }

    async fn pick_edges(&self, solid: SolidId, points: &[Vec3]) -> Result<Vec<EdgeId>, KernelError> {
        self.enter("pick").await?;
        let mut state = self.state.lock();
        state.solid(solid)?;
        let mut edges = Vec::with_capacity(points.len());
        for _ in points {
            let id = state.alloc();
            state.edges.insert(id, solid);
            edges.push(id);
        }
        Ok(edges)
    }

    async fn fillet(&self, radius: f32, edges: &[EdgeId]) -> Result<(), KernelError> {
        self.enter("fillet").await?;
        if radius <= 0.0 {
            return Err(KernelError::Rejected { op: "fillet", message: format!("radius {radius}") });
        }
        let state = self.state.lock();
        if let Some(missing) = edges.iter().find(|e| !state.edges.contains_key(e)) {
            return Err(KernelError::Rejected { op: "fillet", message: format!("unknown edge {missing}") });
        }
        Ok(())
    }

    async fn cylinder(&self, height: f32, diameter: f32) -> Result<SolidId, KernelError> {
        self.enter("cylinder").await?;
        let r = diameter * 0.5;
        let h = height * 0.5;
        let mut state = self.state.lock();
        let id = state.alloc();
        state.solids.insert(id, Bounds { min: Vec3::new(-r, -r, -h), max: Vec3::new(r, r, h) });
        Ok(id)
    }

    async fn move_to(&self, solid: SolidId, position: Vec3) -> Result<(), KernelError> {
        self.enter("move_to").await?;
        let mut state = self.state.lock();
        let moved = state.solid(solid)?.translated_to(position);
        state.solids.insert(solid, moved);
        Ok(())
    }

    async fn rotate_to(&self, solid: SolidId, _euler: Vec3) -> Result<(), KernelError> {
        self.enter("rotate_to").await?;
        self.state.lock().solid(solid)?;
        Ok(())
    }

    async fn subtract(&self, target: SolidId, keep_tools: bool, tools: &[SolidId]) -> Result<(), KernelError> {
        self.enter("subtract").await?;
        let mut state = self.state.lock();
        state.solid(target)?;
        for tool in tools {
            state.solid(*tool)?;
        }
        if !keep_tools {
            for tool in tools {
                state.solids.remove(tool);
            }
        }
        Ok(())
    }

    async fn offset(&self, solid: SolidId, distance: f32) -> Result<(), KernelError> {
        self.enter("offset").await?;
        let mut state = self.state.lock();
        let grown = state.solid(solid)?.grown(distance);
        state.solids.insert(solid, grown);
        Ok(())
    }

    async fn export_geometry(&self, solid: SolidId) -> Result<BufferGeometry, KernelError> {
        self.enter("export").await?;
        let Bounds { min, max } = self.state.lock().solid(solid)?;
        let mut positions = Vec::with_capacity(24);
        for i in 0..8u8 {
            let x = if i & 1 == 0 { min.x } else { max.x };
            let y = if i & 2 == 0 { min.y } else { max.y };
            let z = if i & 4 == 0 { min.z } else { max.z };
            positions.extend([x, y, z]);
        }
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        Ok(BufferGeometry { positions, indices })
    }
}
