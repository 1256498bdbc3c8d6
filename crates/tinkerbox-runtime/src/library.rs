//! Host libraries and the capability set that decides which are loaded
//!
//! Instead of loading every API and deleting globals afterwards, the host
//! settles once per boot which capabilities a computer has. A library (or a
//! single function within one) that needs a missing capability is simply
//! never exposed.

use crate::computer::Computer;
use crate::config::HostConfig;
use std::fmt;
use std::sync::Arc;

/// A permission a library or surface may require
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Reading and changing host settings
    Config,
    /// Mounting host directories
    Mounter,
    /// Creating emulated peripherals
    PeripheralEmulation,
    /// Pixel graphics and other terminal extensions
    Graphics,
    /// Outbound HTTP and websockets
    Http,
    /// Listening for inbound HTTP
    HttpListener,
    /// The debug library
    Debug,
    /// Setting breakpoints from scripts
    Breakpoints,
    /// The debugger computer's own API
    Debugger,
}

impl Capability {
    /// Every capability
    pub const ALL: [Capability; 9] = [
        Capability::Config,
        Capability::Mounter,
        Capability::PeripheralEmulation,
        Capability::Graphics,
        Capability::Http,
        Capability::HttpListener,
        Capability::Debug,
        Capability::Breakpoints,
        Capability::Debugger,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// A set of granted capabilities
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    /// No capabilities
    pub fn empty() -> Self {
        Self(0)
    }

    /// Every capability
    pub fn all() -> Self {
        Capability::ALL.iter().fold(Self::empty(), |set, cap| set.with(*cap))
    }

    /// This set plus `cap`
    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    /// This set minus `cap`
    pub fn without(self, cap: Capability) -> Self {
        Self(self.0 & !cap.bit())
    }

    /// Is `cap` granted?
    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Is a surface needing `requires` allowed?
    pub fn allows(self, requires: Option<Capability>) -> bool {
        requires.map_or(true, |cap| self.contains(cap))
    }

    /// Capabilities of a computer booting under `config`
    pub fn resolve(config: &HostConfig, is_debugger: bool) -> Self {
        let mut set = Self::all().without(Capability::Debugger);
        if is_debugger {
            set = set.with(Capability::Debugger);
        }
        if !config.http_enable {
            set = set
                .without(Capability::Http)
                .without(Capability::HttpListener);
        }
        if !config.debug_enable {
            set = set
                .without(Capability::Debug)
                .without(Capability::Breakpoints);
        }
        if config.vanilla {
            for cap in [
                Capability::Config,
                Capability::Mounter,
                Capability::PeripheralEmulation,
                Capability::Graphics,
                Capability::HttpListener,
                Capability::Breakpoints,
            ] {
                set = set.without(cap);
            }
        }
        if config.server_mode {
            set = set
                .without(Capability::HttpListener)
                .without(Capability::Mounter);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Capability::ALL.iter().filter(|cap| self.contains(**cap)))
            .finish()
    }
}

/// One callable exposed by a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    /// Function name within the library
    pub name: String,
    /// Capability needed to expose it
    pub requires: Option<Capability>,
}

impl Surface {
    /// An ungated surface
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requires: None,
        }
    }

    /// A surface that needs `cap`
    pub fn gated(name: &str, cap: Capability) -> Self {
        Self {
            name: name.to_string(),
            requires: Some(cap),
        }
    }
}

/// A named bundle of surfaces
pub trait Library: Send + Sync {
    /// Global name
    fn name(&self) -> &str;

    /// Capability needed to load the library at all
    fn requires(&self) -> Option<Capability> {
        None
    }

    /// Every surface the library can expose
    fn surfaces(&self) -> &[Surface];

    /// Called when a computer that loaded this library stops
    fn deinit(&self, _computer: &Computer) {}

    /// Names of the surfaces `caps` allows
    fn exposed(&self, caps: CapabilitySet) -> Vec<&str> {
        self.surfaces()
            .iter()
            .filter(|s| caps.allows(s.requires))
            .map(|s| s.name.as_str())
            .collect()
    }
}

impl fmt::Debug for dyn Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name())
            .field("requires", &self.requires())
            .finish()
    }
}

/// A library defined entirely by its surface list
#[derive(Debug, Clone)]
pub struct StandardLibrary {
    name: String,
    requires: Option<Capability>,
    surfaces: Vec<Surface>,
}

impl StandardLibrary {
    /// Create a library
    pub fn new(name: &str, requires: Option<Capability>, surfaces: Vec<Surface>) -> Self {
        Self {
            name: name.to_string(),
            requires,
            surfaces,
        }
    }
}

impl Library for StandardLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Option<Capability> {
        self.requires
    }

    fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }
}

fn plain(names: &[&str]) -> Vec<Surface> {
    names.iter().map(|name| Surface::new(name)).collect()
}

/// The built-in host APIs
pub fn standard_libraries() -> Vec<Arc<dyn Library>> {
    use Capability::*;

    let mut term = plain(&[
        "write", "scroll", "setCursorPos", "getCursorPos", "setCursorBlink", "getSize", "clear",
        "clearLine", "setTextColor", "setBackgroundColor", "isColor", "blit",
        "setPaletteColor", "getPaletteColor",
    ]);
    term.extend(
        [
            "getGraphicsMode", "setGraphicsMode", "getPixel", "setPixel", "drawPixels",
            "getPixels", "screenshot", "showMouse", "setFrozen", "getFrozen",
        ]
        .iter()
        .map(|name| Surface::gated(name, Graphics)),
    );

    let mut http = plain(&["request", "checkURL", "websocket"]);
    http.push(Surface::gated("addListener", HttpListener));
    http.push(Surface::gated("removeListener", HttpListener));

    let mut debug = plain(&["traceback", "getinfo", "getlocal", "sethook", "gethook"]);
    debug.push(Surface::gated("setbreakpoint", Breakpoints));
    debug.push(Surface::gated("unsetbreakpoint", Breakpoints));

    let libraries: Vec<StandardLibrary> = vec![
        StandardLibrary::new("config", Some(Config), plain(&["get", "set", "list", "getType"])),
        StandardLibrary::new(
            "fs",
            None,
            plain(&["list", "exists", "isDir", "open", "delete", "move", "copy", "makeDir"]),
        ),
        StandardLibrary::new("mounter", Some(Mounter), plain(&["mount", "unmount", "list"])),
        StandardLibrary::new(
            "os",
            None,
            plain(&[
                "queueEvent", "startTimer", "cancelTimer", "clock", "time", "date", "getComputerID",
                "getComputerLabel", "setComputerLabel", "shutdown", "reboot",
            ]),
        ),
        StandardLibrary::new(
            "peripheral",
            None,
            plain(&["isPresent", "getType", "getMethods", "call"]),
        ),
        StandardLibrary::new("periphemu", Some(PeripheralEmulation), plain(&["create", "remove"])),
        StandardLibrary::new(
            "redstone",
            None,
            plain(&["getSides", "getInput", "setOutput", "getOutput"]),
        ),
        StandardLibrary::new("term", None, term),
        StandardLibrary::new("http", Some(Http), http),
        StandardLibrary::new("debug", Some(Debug), debug),
        StandardLibrary::new(
            "debugger",
            Some(Debugger),
            plain(&["waitForBreak", "continue", "step", "getReason", "setBreakpoint"]),
        ),
    ];

    libraries
        .into_iter()
        .map(|lib| Arc::new(lib) as Arc<dyn Library>)
        .collect()
}

/// Base-library globals that are never exposed under `config`
pub fn hidden_globals(config: &HostConfig) -> Vec<&'static str> {
    let mut hidden = vec!["dofile", "loadfile", "module", "require", "package", "print"];
    if !config.debug_enable {
        hidden.extend(["collectgarbage", "newproxy"]);
    }
    hidden
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib<'a>(libs: &'a [Arc<dyn Library>], name: &str) -> &'a Arc<dyn Library> {
        libs.iter().find(|l| l.name() == name).unwrap()
    }

    #[test]
    fn test_default_capabilities() {
        let caps = CapabilitySet::resolve(&HostConfig::default(), false);
        assert!(caps.contains(Capability::Http));
        assert!(caps.contains(Capability::Breakpoints));
        assert!(!caps.contains(Capability::Debugger));

        let caps = CapabilitySet::resolve(&HostConfig::default(), true);
        assert!(caps.contains(Capability::Debugger));
    }

    #[test]
    fn test_vanilla_strips_extensions() {
        let config = HostConfig {
            vanilla: true,
            ..HostConfig::default()
        };
        let caps = CapabilitySet::resolve(&config, false);
        for cap in [
            Capability::Config,
            Capability::Mounter,
            Capability::PeripheralEmulation,
            Capability::Graphics,
            Capability::HttpListener,
            Capability::Breakpoints,
        ] {
            assert!(!caps.contains(cap), "{:?} should be stripped", cap);
        }
        assert!(caps.contains(Capability::Http));
        assert!(caps.contains(Capability::Debug));
    }

    #[test]
    fn test_server_mode_and_flags() {
        let config = HostConfig {
            server_mode: true,
            http_enable: false,
            debug_enable: false,
            ..HostConfig::default()
        };
        let caps = CapabilitySet::resolve(&config, false);
        assert!(!caps.contains(Capability::Mounter));
        assert!(!caps.contains(Capability::HttpListener));
        assert!(!caps.contains(Capability::Http));
        assert!(!caps.contains(Capability::Debug));
        assert!(!caps.contains(Capability::Breakpoints));
        assert!(caps.contains(Capability::Config));
    }

    #[test]
    fn test_gated_surfaces() {
        let libs = standard_libraries();
        let config = HostConfig {
            vanilla: true,
            ..HostConfig::default()
        };
        let caps = CapabilitySet::resolve(&config, false);

        let term = lib(&libs, "term").exposed(caps);
        assert!(term.contains(&"write"));
        assert!(!term.contains(&"setPixel"));

        let debug = lib(&libs, "debug").exposed(caps);
        assert!(debug.contains(&"traceback"));
        assert!(!debug.contains(&"setbreakpoint"));
    }

    #[test]
    fn test_hidden_globals() {
        let config = HostConfig::default();
        assert!(!hidden_globals(&config).contains(&"collectgarbage"));

        let config = HostConfig {
            debug_enable: false,
            ..HostConfig::default()
        };
        let hidden = hidden_globals(&config);
        assert!(hidden.contains(&"print"));
        assert!(hidden.contains(&"newproxy"));
    }
}
