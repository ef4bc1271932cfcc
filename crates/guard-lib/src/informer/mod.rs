//! Pod watch, local cache and change notification
//!
//! This module provides:
//! - A local mirror of pods fed by the watch stream, serving consistent reads
//! - The change notifier that filters no-op updates and enqueues pod keys
//! - The watcher task that drives a `kube` watch into both

mod cache;
mod notifier;
mod watcher;

pub use cache::{pod_key, PodCache};
pub use notifier::{pod_changed, ChangeNotifier, PodEventHandler};
pub use watcher::{PodWatcher, WatchEventApplier};
