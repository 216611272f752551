//! Name demangling via the external `c++filt` utility.
//!
//! Demangling is a collaborator, not a core concern: failures of any kind
//! fall back to the raw name, and nothing demangled is ever stored in the
//! index.

use once_cell::sync::Lazy;
use std::process::Command;

static CXXFILT: Lazy<Option<&'static str>> = Lazy::new(|| {
    let available = Command::new("c++filt")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    available.then_some("c++filt")
});

/// Demangle one symbol name. Returns `None` when no demangler is available
/// or the name does not demangle to anything different.
pub fn demangle(name: &str) -> Option<String> {
    // only Itanium-mangled names are worth a subprocess round trip
    if !name.starts_with("_Z") {
        return None;
    }
    let tool = (*CXXFILT)?;
    let output = Command::new(tool).arg("--").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let demangled = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if demangled.is_empty() || demangled == name {
        None
    } else {
        Some(demangled)
    }
}
