//! Two participants in one room, scripted against the in-process hub and kernel.
//!
//! Run with `RUST_LOG=partroom=debug` to watch replication and cache traffic.

use std::process::ExitCode;

use glam::{Mat4, Vec2, Vec3};
use tracing::{error, info};

use partroom::config::ViewerConfig;
use partroom::error::ErrorCode;
use partroom::interaction::Key;
use partroom::kernel::sim::SimKernel;
use partroom::kernel::{KernelError, KernelSession};
use partroom::loopback::LoopbackHub;
use partroom::model::{PartialPart, Storage};
use partroom::replication::ReplicationError;
use partroom::scene::{Camera, SceneRegistry, ndc_from_client};
use partroom::session::RoomSession;

const FRAME: f32 = 1.0 / 60.0;

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl ErrorCode for DemoError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Replication(e) => e.error_code(),
            Self::Kernel(e) => e.error_code(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match ViewerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "invalid configuration");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn initial_storage() -> Storage {
    let mut storage = Storage::default();
    storage.objects.insert("box".into(), Mat4::IDENTITY);
    storage.objects.insert("sphere".into(), Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)));
    storage
}

async fn run(config: ViewerConfig) -> Result<(), DemoError> {
    let hub = LoopbackHub::new();
    let kernel = KernelSession::new(config.kernel.clone()).handle(SimKernel::connect).await?;

    let mut alice = RoomSession::enter(hub.connect(), &config, kernel.clone(), initial_storage()).await?;
    let mut bob = RoomSession::enter(hub.connect(), &config, kernel, initial_storage()).await?;

    let mut scene = SceneRegistry::new();
    scene.insert("box", Vec3::splat(0.5), Mat4::IDENTITY);
    scene.insert("sphere", Vec3::splat(0.5), Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)));
    let camera = Camera::default();

    // Alice points at the box and leaves a note on it.
    alice.pointer_move(ndc_from_client(400.0, 300.0, 800.0, 600.0), &camera, &scene);
    for key in ["/", "n", "i", "c", "e", Key::ENTER] {
        alice.key(&Key::new(key));
    }

    // Bob drags the sphere upward while Alice's note travels.
    bob.begin_drag("sphere");
    for step in 1..=10u8 {
        let lift = f32::from(step) * 0.1;
        bob.drag_to(Mat4::from_translation(Vec3::new(4.0, lift, 0.0)));
        hub.deliver_all();
        alice.frame(FRAME);
        bob.frame(FRAME);
        tokio::task::yield_now().await;
    }
    bob.end_drag();

    // Bob widens the part; both participants rebuild.
    bob.set_part(&PartialPart { width: Some(120.0), ..PartialPart::default() });
    bob.pointer_move(Vec2::new(0.9, 0.9), &camera, &scene);

    for _ in 0..30 {
        hub.deliver_all();
        alice.frame(FRAME);
        bob.frame(FRAME);
        tokio::task::yield_now().await;
    }
    alice.settle_part().await;
    bob.settle_part().await;

    let sphere = alice.damper().object("sphere").unwrap_or(Mat4::IDENTITY);
    info!(
        annotations = bob.store().annotations().len(),
        sphere_y = sphere.w_axis.y,
        width = alice.store().part().width,
        triangles = alice.part().geometry().map_or(0, |g| g.triangle_count()),
        peers = alice.damper().peers().count(),
        "room settled"
    );

    alice.leave().await?;
    bob.leave().await?;
    Ok(())
}
