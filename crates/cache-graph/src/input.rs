//! Stand-in types for the pre-parsed dylib/class/category graph that the
//! real binary parser (out of scope, ss1) would hand this crate. In this
//! repository they are read from a JSON document at the CLI boundary so the
//! graph builder can be exercised without a linker.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct InputDylib {
    pub install_name: String,
    #[serde(default)]
    pub classes: Vec<InputClass>,
    #[serde(default)]
    pub categories: Vec<InputCategory>,
}

/// A cross-dylib reference to another class. Left unresolved (dangling), a
/// reference represents a weak dependency that did not load -- the graph
/// builder skips it silently (ss4.1, ss7).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InputClassRef {
    pub install_name: String,
    pub name: String,
    #[serde(default)]
    pub is_metaclass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputClass {
    pub name: String,
    #[serde(default)]
    pub is_metaclass: bool,
    #[serde(default)]
    pub is_root_class: bool,
    #[serde(default)]
    pub superclass: Option<InputClassRef>,
    #[serde(default)]
    pub metaclass: Option<InputClassRef>,
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputCategory {
    pub name: String,
    pub target_install_name: String,
    pub target_class_name: String,
    #[serde(default)]
    pub instance_methods: Vec<String>,
    #[serde(default)]
    pub class_methods: Vec<String>,
}
