//! Remote geometry kernel boundary.
//!
//! DESIGN
//! ======
//! The kernel is an opaque asynchronous service reached over one persistent
//! connection per process. Solids and edges live on the kernel side and are
//! addressed by id; only exported buffer geometry crosses back. Builders
//! handed to the geometry cache receive a `KernelHandle` and compose the
//! primitive operations below.

pub mod sim;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use glam::{Vec2, Vec3};
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

/// Kernel-side solid reference.
pub type SolidId = u64;

/// Kernel-side edge reference.
pub type EdgeId = u64;

/// Closed planar outline, built like a pen path starting at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    points: Vec<Vec2>,
}

impl Default for Profile {
    fn default() -> Self {
        Self { points: vec![Vec2::ZERO] }
    }
}

impl Profile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn line_to(mut self, x: f32, y: f32) -> Self {
        self.points.push(Vec2::new(x, y));
        self
    }

    #[must_use]
    pub fn points(&self) -> &[Vec2] {
        &self.points
    }
}

/// Triangle mesh exported from a solid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferGeometry {
    /// Flat `xyz` triples.
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

impl BufferGeometry {
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Where the kernel lives and which session to bind to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelEndpoint {
    pub url: String,
    pub session: String,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("kernel rejected {op}: {message}")]
    Rejected { op: &'static str, message: String },
    #[error("kernel disconnected")]
    Disconnected,
    #[error("unknown solid: {0}")]
    UnknownSolid(SolidId),
}

impl ErrorCode for KernelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "E_KERNEL_REJECTED",
            Self::Disconnected => "E_KERNEL_DISCONNECTED",
            Self::UnknownSolid(_) => "E_KERNEL_UNKNOWN_SOLID",
        }
    }
}

// =============================================================================
// KERNEL
// =============================================================================

/// Primitive solid-modeling operations exposed by the remote kernel.
#[async_trait]
pub trait GeometryKernel: Send + Sync {
    /// Sweep `profile` along `direction` into a new solid.
    async fn extrude(&self, direction: Vec3, profile: &Profile) -> Result<SolidId, KernelError>;

    /// Edges of `solid` nearest to each of `points`.
    async fn pick_edges(&self, solid: SolidId, points: &[Vec3]) -> Result<Vec<EdgeId>, KernelError>;

    async fn fillet(&self, radius: f32, edges: &[EdgeId]) -> Result<(), KernelError>;

    /// New cylinder solid centred on the origin, axis along z.
    async fn cylinder(&self, height: f32, diameter: f32) -> Result<SolidId, KernelError>;

    async fn move_to(&self, solid: SolidId, position: Vec3) -> Result<(), KernelError>;

    /// Absolute rotation as XYZ Euler angles in radians.
    async fn rotate_to(&self, solid: SolidId, euler: Vec3) -> Result<(), KernelError>;

    /// Boolean subtract `tools` from `target`; tools are consumed unless `keep_tools`.
    async fn subtract(&self, target: SolidId, keep_tools: bool, tools: &[SolidId]) -> Result<(), KernelError>;

    async fn offset(&self, solid: SolidId, distance: f32) -> Result<(), KernelError>;

    async fn export_geometry(&self, solid: SolidId) -> Result<BufferGeometry, KernelError>;
}

/// Shared handle passed to every geometry builder.
pub type KernelHandle = Arc<dyn GeometryKernel>;

// =============================================================================
// SESSION
// =============================================================================

/// Lazily established, process-wide kernel connection.
///
/// Concurrent callers of `handle` wait on the same connection attempt; a
/// failed attempt is not cached, so the next caller tries again.
pub struct KernelSession {
    endpoint: KernelEndpoint,
    handle: OnceCell<KernelHandle>,
}

impl KernelSession {
    #[must_use]
    pub fn new(endpoint: KernelEndpoint) -> Self {
        Self { endpoint, handle: OnceCell::new() }
    }

    #[must_use]
    pub fn endpoint(&self) -> &KernelEndpoint {
        &self.endpoint
    }

    /// The connected handle, connecting with `connect` on first use.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first connection attempt fails.
    pub async fn handle<F, Fut>(&self, connect: F) -> Result<KernelHandle, KernelError>
    where
        F: FnOnce(KernelEndpoint) -> Fut,
        Fut: Future<Output = Result<KernelHandle, KernelError>>,
    {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let handle = connect(self.endpoint.clone()).await?;
                info!(url = %self.endpoint.url, session = %self.endpoint.session, "kernel connected");
                Ok::<_, KernelError>(handle)
            })
            .await?;
        Ok(Arc::clone(handle))
    }
}
