//! Vulkan backend for a frame-graph renderer.
//!
//! The planner hands over a declarative list of passes, a flat command
//! stream, and a table describing how every resource is used; this crate
//! turns that into correctly-synchronized Vulkan command buffers:
//!
//! * consecutive draw passes over the same attachments merge into one render
//!   pass with multiple subpasses, with derived load/store ops, layouts and
//!   subpass dependencies;
//! * per-pass encoders translate abstract commands, rebuilding pipelines
//!   lazily from keyed, cached state;
//! * layout transitions, barriers, events and semaphores are emitted from a
//!   schedule derived ahead of encoding, and transient resources are aliased
//!   through per-domain pools across frames;
//! * SPIR-V reflection drives descriptor-set layouts, pipeline layouts and
//!   binding-path resolution.
//!
//! Encoding is synchronous on the planner thread; the only blocking point is
//! GPU completion, which lives on a background worker.
#[macro_use]
extern crate log;

// callers speak raw vk types at the contract boundary
pub use ash;

pub mod alloc;
pub mod backend;
pub mod binding;
pub mod buffer;
pub mod commands;
pub mod desc;
pub mod device;
pub mod encoder;
mod error;
pub mod executor;
pub mod format;
pub mod image;
pub mod instance;
pub mod memory;
mod path;
pub mod pipeline;
pub mod reflection;
pub mod registry;
pub mod render_pass;
pub mod render_target;
pub mod resource;
pub mod resource_commands;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use self::backend::{Backend, ReflectionSnapshot};
pub use self::commands::{
    AttachmentBinding, ClearValue, Command, PassRecord, PassType, QueueClass, RenderTargets,
    ResourceUsage, ResourceUsageTable, UsageKind,
};
pub use self::desc::*;
pub use self::error::{BackendError, Result};
pub use self::format::PixelFormat;
pub use self::path::{BindingPath, ARGUMENT_BUFFER_BINDING, PUSH_CONSTANT_SET};
pub use self::resource::*;
