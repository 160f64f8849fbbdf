// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Helpers for rendering verdict-log prefixes.

use std::path::{Component, Path};

/// Shortens a test-file path for the log prefix: at most the last four path
/// components, stopping below any component literally named `test`, joined
/// with forward slashes.
pub fn normalize_path(path: &Path) -> String {
    let mut elements: Vec<&str> = vec![];
    for component in path.components().rev() {
        if elements.len() >= 4 {
            break;
        }
        let name = match component {
            Component::Normal(name) => name.to_str().unwrap_or_default(),
            _ => break,
        };
        if name == "test" {
            break;
        }
        elements.push(name);
    }
    elements.reverse();
    elements.join("/").replace('\\', "/")
}

/// Shortens queries beyond 50 characters to 47 plus an ellipsis, when
/// truncation is on.
pub fn truncate_query(query: &str, truncate: bool) -> String {
    if truncate && query.chars().count() > 50 {
        let head: String = query.chars().take(47).collect();
        format!("{}...", head)
    } else {
        query.to_owned()
    }
}
