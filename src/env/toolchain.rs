// src/env/toolchain.rs

//! Cross-toolchain environment bindings
//!
//! Expands the configured toolchain into the conventional environment
//! variables (`CC`, `CXX`, `AR`, `LD`, ...) recipes expect, pointing each
//! at `<bin>/<cross_prefix><tool>`.

use crate::config::Toolchain;
use crate::env::Environment;
use std::path::Path;

/// The standard binutils/gcc programs bound through the cross prefix.
pub const CROSS_TOOLS: &[&str] = &[
    "ar",
    "as",
    "ld",
    "nm",
    "objcopy",
    "objdump",
    "ranlib",
    "strip",
    "addr2line",
    "c++filt",
    "dlltool",
    "elfedit",
    "gprof",
    "readelf",
    "size",
    "strings",
    "gcc",
    "g++",
];

/// Aliases resolved to an already-bound tool's path.
const TOOL_ALIASES: &[(&str, &str)] = &[("cc", "gcc"), ("c++", "g++")];

/// Environment variable name for a tool: uppercased, `-` becomes `_` and
/// `+` becomes `X` (so `c++` is `CXX` and `addr2line` is `ADDR2LINE`).
pub fn tool_env_name(tool: &str) -> String {
    tool.to_uppercase().replace('-', "_").replace('+', "X")
}

/// Bind the toolchain's programs into `env`.
///
/// Expects the toolchain fields to be fully substituted already.
pub fn apply_toolchain(env: &mut Environment, toolchain: &Toolchain) {
    if let Some(dir) = toolchain.file_path.parent() {
        if !toolchain.file_path.as_os_str().is_empty() {
            env.set("FILE_DIR", &dir.to_string_lossy());
        }
    }

    if !toolchain.cross_prefix.is_empty() {
        env.set("CROSS_PREFIX", &toolchain.cross_prefix);
    }

    let bin = Path::new(&toolchain.bin);
    for tool in CROSS_TOOLS {
        let path = bin.join(format!("{}{}", toolchain.cross_prefix, tool));
        env.set(&tool_env_name(tool), &path.to_string_lossy());
    }

    for (alias, target) in TOOL_ALIASES {
        if let Some(path) = env.get(&tool_env_name(target)) {
            let path = path.to_string();
            env.set(&tool_env_name(alias), &path);
        }
    }

    for program in &toolchain.extra_programs {
        let path = bin.join(program);
        env.set(&tool_env_name(program), &path.to_string_lossy());
    }
}
