// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update targets: the addressable scopes an update can apply to.

use serde::{Deserialize, Serialize};

use crate::label::label_escape;

/// Class of an update target.
///
/// `Machine`, `Portable`, `Sysext`, and `Confext` targets are backed by
/// discovered disk images; `Host` and `Component` are defined by the
/// worker's `components` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    Machine,
    Portable,
    Sysext,
    Confext,
    Host,
    Component,
}

impl TargetClass {
    /// Image classes that are discovered from disk, in enumeration order.
    pub const DISCOVERABLE: [TargetClass; 4] =
        [TargetClass::Machine, TargetClass::Portable, TargetClass::Sysext, TargetClass::Confext];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetClass::Machine => "machine",
            TargetClass::Portable => "portable",
            TargetClass::Sysext => "sysext",
            TargetClass::Confext => "confext",
            TargetClass::Host => "host",
            TargetClass::Component => "component",
        }
    }
}

crate::simple_display! {
    TargetClass {
        Machine => "machine",
        Portable => "portable",
        Sysext => "sysext",
        Confext => "confext",
        Host => "host",
        Component => "component",
    }
}

/// On-disk representation of a discovered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Directory,
    Subvolume,
    Raw,
    Block,
}

impl ImageType {
    /// Whether the image is addressed as a mounted tree (`--root=`)
    /// rather than an image file or device (`--image=`).
    pub fn is_tree(&self) -> bool {
        matches!(self, ImageType::Directory | ImageType::Subvolume)
    }
}

crate::simple_display! {
    ImageType {
        Directory => "directory",
        Subvolume => "subvolume",
        Raw => "raw",
        Block => "block",
    }
}

/// Stable identity of a target: its class plus its name.
///
/// The string form is `host` for the host target and `class:name` for
/// everything else; that string is what gets label-escaped into the
/// target's object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    class: TargetClass,
    name: String,
}

impl TargetId {
    pub fn new(class: TargetClass, name: impl Into<String>) -> Self {
        Self { class, name: name.into() }
    }

    pub fn host() -> Self {
        Self { class: TargetClass::Host, name: "host".to_string() }
    }

    pub fn class(&self) -> TargetClass {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry key, as it appears (escaped) in the object path.
    pub fn as_registry_key(&self) -> String {
        match self.class {
            TargetClass::Host => "host".to_string(),
            class => format!("{}:{}", class, self.name),
        }
    }

    /// Object path of this target on the bus.
    pub fn object_path(&self) -> String {
        format!("{}/target/{}", crate::MANAGER_PATH, label_escape(&self.as_registry_key()))
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_registry_key())
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
