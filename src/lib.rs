//! Core of a multi-user 3D viewer for parametric parts.
//!
//! Several participants share one room: they drag shared objects, leave
//! spatial annotations, and tune the parameters of a part whose geometry is
//! built by a remote solid-modeling kernel. This crate holds the replicated
//! scene state, the keyed cache in front of the kernel, the pointer and
//! keyboard state machine, and the per-frame smoothing. Rendering, UI widgets,
//! and the wire protocols of the backends live outside it.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Application root for one room; wires everything below together |
//! | [`store`] | Room-scoped replica of shared state with slice subscriptions |
//! | [`model`] | Shared-state types and the last-write-wins apply rule |
//! | [`replication`] | Replication service seam and its events |
//! | [`loopback`] | In-process replication hub for tests and the demo |
//! | [`cache`] | Dependency-keyed memoization of kernel builds |
//! | [`key`] | Dependency keys compared by value |
//! | [`kernel`] | Geometry kernel seam, lazy connection, and an in-process double |
//! | [`part`] | Parameter ranges, the part recipe, and the part view |
//! | [`scene`] | Camera, pointer rays, and the named-object registry |
//! | [`interaction`] | Hover and annotation-authoring state machine |
//! | [`damping`] | Exponential smoothing and per-object drag locks |
//! | [`config`] | Environment configuration |
//! | [`error`] | Error codes shared by every error type |

pub mod cache;
pub mod config;
pub mod damping;
pub mod error;
pub mod interaction;
pub mod kernel;
pub mod key;
pub mod loopback;
pub mod model;
pub mod part;
pub mod replication;
pub mod scene;
pub mod session;
pub mod store;
