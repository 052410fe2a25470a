// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup services: where the configuration lives and which external tools
// are installed.

pub mod data_dir;
pub mod tools;
