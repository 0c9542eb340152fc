//! Runtime settings.
//!
//! Settings come from a TOML document or from `VARFLOW_*` environment
//! variables and live in one process-wide slot. [`disable_jit`] overrides
//! the `jit` flag for the current thread only.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::LazyLock;

pub const ENV_DISABLE_JIT: &str = "VARFLOW_DISABLE_JIT";
pub const ENV_UNROLL: &str = "VARFLOW_UNROLL";
pub const ENV_SHOW_CODE: &str = "VARFLOW_SHOW_CODE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Route combinators through the engine. When off, bodies run directly
    /// and mutate Variables in place.
    #[serde(default = "default_jit")]
    pub jit: bool,

    /// `unroll` used by `for_loop` when the caller does not pass one.
    #[serde(default = "default_unroll")]
    pub default_unroll: usize,

    /// Log the rendered branch chain of every `ifelse` call.
    #[serde(default)]
    pub show_code: bool,
}

fn default_jit() -> bool {
    true
}

fn default_unroll() -> usize {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jit: default_jit(),
            default_unroll: default_unroll(),
            show_code: false,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| Error::Config(err.to_string()))
    }

    /// Defaults overridden by `VARFLOW_*` variables. Unparsable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(raw) = lookup(ENV_DISABLE_JIT) {
            match parse_flag(&raw) {
                Some(disabled) => settings.jit = !disabled,
                None => log::warn!("ignoring {ENV_DISABLE_JIT}={raw:?}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_UNROLL) {
            match raw.trim().parse::<usize>() {
                Ok(unroll) if unroll > 0 => settings.default_unroll = unroll,
                _ => log::warn!("ignoring {ENV_UNROLL}={raw:?}: expected a positive integer"),
            }
        }
        if let Some(raw) = lookup(ENV_SHOW_CODE) {
            match parse_flag(&raw) {
                Some(show) => settings.show_code = show,
                None => log::warn!("ignoring {ENV_SHOW_CODE}={raw:?}: expected a boolean"),
            }
        }
        settings
    }

    fn validate(&self) -> Result<()> {
        if self.default_unroll == 0 {
            return Err(Error::Config("default_unroll must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::from_env()));

thread_local! {
    /// Nesting depth of `disable_jit` scopes on this thread.
    static JIT_DISABLED: Cell<u32> = const { Cell::new(0) };
}

/// Snapshot of the process-wide settings.
pub fn settings() -> Settings {
    SETTINGS.read().clone()
}

pub fn set_settings(settings: Settings) -> Result<()> {
    settings.validate()?;
    log::debug!("settings updated: {settings:?}");
    *SETTINGS.write() = settings;
    Ok(())
}

/// Whether combinators on this thread go through the engine.
pub fn jit_enabled() -> bool {
    JIT_DISABLED.with(|depth| depth.get() == 0) && SETTINGS.read().jit
}

/// Run `f` with the engine bypassed on this thread: every combinator
/// called inside executes its bodies directly.
pub fn disable_jit<T>(f: impl FnOnce() -> T) -> T {
    struct Restore;
    impl Drop for Restore {
        fn drop(&mut self) {
            JIT_DISABLED.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
    }

    JIT_DISABLED.with(|depth| depth.set(depth.get() + 1));
    let _restore = Restore;
    f()
}
