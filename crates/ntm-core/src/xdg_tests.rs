// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn subdirectories_are_rooted_under_ntm() {
    assert!(manifests_dir().ends_with("ntm/manifests"));
    assert!(sessions_dir().ends_with("ntm/sessions"));
    assert!(logs_dir().ends_with("ntm/logs"));
}
