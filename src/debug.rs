//! Debug logging utilities for guestmem.
//!
//! Set the `GUESTMEM_DEBUG` environment variable to enable verbose logging:
//! - `GUESTMEM_DEBUG=1` - Enable all debug output
//! - `GUESTMEM_DEBUG=carveout` - Enable only host carveout logs
//! - `GUESTMEM_DEBUG=chunks` - Enable only chunk map logs
//! - `GUESTMEM_DEBUG=carveout,chunks` - Enable multiple categories
//!
//! Enabled messages are emitted through `tracing` at `DEBUG` level, so a
//! subscriber still decides where they end up.

use std::sync::OnceLock;

/// Debug categories that can be enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Carveout,
    Chunks,
    All,
}

/// Cached debug configuration
static DEBUG_CONFIG: OnceLock<DebugConfig> = OnceLock::new();

#[derive(Debug, Default, PartialEq, Eq)]
struct DebugConfig {
    enabled: bool,
    carveout: bool,
    chunks: bool,
}

impl DebugConfig {
    fn from_env() -> Self {
        Self::parse(std::env::var("GUESTMEM_DEBUG").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(val) if val == "1" || val.eq_ignore_ascii_case("all") => Self {
                enabled: true,
                carveout: true,
                chunks: true,
            },
            Some(val) => {
                let val_lower = val.to_lowercase();
                Self {
                    enabled: true,
                    carveout: val_lower.contains("carveout"),
                    chunks: val_lower.contains("chunks"),
                }
            }
            None => Self::default(),
        }
    }

    fn allows(&self, category: DebugCategory) -> bool {
        if !self.enabled {
            return false;
        }
        match category {
            DebugCategory::All => self.carveout || self.chunks,
            DebugCategory::Carveout => self.carveout,
            DebugCategory::Chunks => self.chunks,
        }
    }
}

fn get_config() -> &'static DebugConfig {
    DEBUG_CONFIG.get_or_init(DebugConfig::from_env)
}

/// Check if debug logging is enabled for a category
pub fn is_debug_enabled(category: DebugCategory) -> bool {
    get_config().allows(category)
}

/// Debug log macro for host carveout discovery
#[macro_export]
macro_rules! debug_carveout {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled($crate::debug::DebugCategory::Carveout) {
            ::tracing::debug!(target: "guestmem::carveout", $($arg)*);
        }
    };
}

/// Debug log macro for chunk map mutations
#[macro_export]
macro_rules! debug_chunks {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled($crate::debug::DebugCategory::Chunks) {
            ::tracing::debug!(target: "guestmem::chunks", $($arg)*);
        }
    };
}
