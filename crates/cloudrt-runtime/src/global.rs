//! Process-wide runtime slot.
//!
//! At most one [`CloudRuntimes`] is installed at a time. Readers take a
//! snapshot `Arc`, so a teardown never invalidates a runtime that is in use.

use crate::error::RuntimeError;
use crate::runtime::CloudRuntimes;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::info;

static CURRENT: ArcSwapOption<CloudRuntimes> = ArcSwapOption::const_empty();

pub fn install(runtimes: Arc<CloudRuntimes>) -> Result<(), RuntimeError> {
    let registrations = runtimes.dispatcher().registry().len();
    let previous = CURRENT.compare_and_swap(&None::<Arc<CloudRuntimes>>, Some(runtimes));
    if previous.is_some() {
        return Err(RuntimeError::AlreadyInstalled);
    }
    info!(registrations, "Installed cloud runtimes");
    Ok(())
}

pub fn current() -> Option<Arc<CloudRuntimes>> {
    CURRENT.load_full()
}

/// Clears the slot and hands back what was installed.
pub fn teardown() -> Option<Arc<CloudRuntimes>> {
    let previous = CURRENT.swap(None);
    if previous.is_some() {
        info!("Tore down cloud runtimes");
    }
    previous
}
