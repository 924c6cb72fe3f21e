// Copyright 2018-2025 the Deno authors. MIT license.

pub mod fs;
pub mod glob;
pub mod ignore;
pub mod logger;
